//! Convenience constructors for parse-tree shapes.
//!
//! The parser normally produces these trees; embedding hosts and tests
//! build them directly. Each helper mirrors one grammar production.

use crate::node::AstNode;
use crate::token::TokenKind;

/// `TOK_QUERY(from, insert...)`
pub fn query(from: AstNode, inserts: Vec<AstNode>) -> AstNode {
    let mut children = vec![from];
    children.extend(inserts);
    AstNode::node(TokenKind::Query, children)
}

/// `TOK_FROM(src)`
pub fn from(src: AstNode) -> AstNode {
    AstNode::node(TokenKind::From, vec![src])
}

/// `TOK_INSERT(destination, select, clause...)`
pub fn insert(destination: AstNode, select: AstNode, clauses: Vec<AstNode>) -> AstNode {
    let mut children = vec![destination, select];
    children.extend(clauses);
    AstNode::node(TokenKind::Insert, children)
}

/// Table reference, optionally sampled and aliased.
pub fn tabref(table: &str, sample: Option<AstNode>, alias: Option<&str>) -> AstNode {
    let mut children = vec![AstNode::leaf(TokenKind::Identifier, table)];
    if let Some(s) = sample {
        children.push(s);
    }
    if let Some(a) = alias {
        children.push(AstNode::leaf(TokenKind::Identifier, a));
    }
    AstNode::node(TokenKind::TabRef, children)
}

/// `TOK_SUBQUERY(query, alias)`
pub fn subquery(query: AstNode, alias: &str) -> AstNode {
    AstNode::node(
        TokenKind::Subquery,
        vec![query, AstNode::leaf(TokenKind::Identifier, alias)],
    )
}

/// A join of the given kind with an `ON` condition.
pub fn join(kind: TokenKind, left: AstNode, right: AstNode, cond: AstNode) -> AstNode {
    debug_assert!(kind.is_join());
    AstNode::node(kind, vec![left, right, cond])
}

/// `TOK_TABLESAMPLE(numerator, denominator, col...)`
pub fn table_sample(numerator: u32, denominator: u32, cols: Vec<AstNode>) -> AstNode {
    let mut children = vec![
        AstNode::leaf(TokenKind::Number, numerator.to_string()),
        AstNode::leaf(TokenKind::Number, denominator.to_string()),
    ];
    children.extend(cols);
    AstNode::node(TokenKind::TableSample, children)
}

/// Destination: implicit temporary file.
pub fn dest_tmp_file() -> AstNode {
    AstNode::node(
        TokenKind::Destination,
        vec![AstNode::node(
            TokenKind::Dir,
            vec![AstNode::node(TokenKind::TmpFile, vec![])],
        )],
    )
}

/// Destination: named directory, DFS or local.
pub fn dest_dir(path: &str, local: bool) -> AstNode {
    let kind = if local {
        TokenKind::LocalDir
    } else {
        TokenKind::Dir
    };
    AstNode::node(
        TokenKind::Destination,
        vec![AstNode::node(
            kind,
            vec![AstNode::leaf(TokenKind::StringLiteral, path)],
        )],
    )
}

/// Destination: table.
pub fn dest_tab(table: &str) -> AstNode {
    AstNode::node(
        TokenKind::Destination,
        vec![AstNode::node(
            TokenKind::Tab,
            vec![AstNode::leaf(TokenKind::Identifier, table)],
        )],
    )
}

/// Destination: one partition of a table.
pub fn dest_partition(table: &str, spec: Vec<(&str, &str)>) -> AstNode {
    let mut children = vec![AstNode::leaf(TokenKind::Identifier, table)];
    for (col, val) in spec {
        children.push(AstNode::node(
            TokenKind::PartVal,
            vec![
                AstNode::leaf(TokenKind::Identifier, col),
                AstNode::leaf(TokenKind::StringLiteral, val),
            ],
        ));
    }
    AstNode::node(
        TokenKind::Destination,
        vec![AstNode::node(TokenKind::Tab, children)],
    )
}

/// `TOK_SELECT(selexpr...)` or `TOK_SELECTDI(selexpr...)`
pub fn select(distinct: bool, items: Vec<AstNode>) -> AstNode {
    let kind = if distinct {
        TokenKind::SelectDi
    } else {
        TokenKind::Select
    };
    AstNode::node(kind, items)
}

/// `TOK_SELEXPR(expr [, alias])`
pub fn sel_expr(expr: AstNode, alias: Option<&str>) -> AstNode {
    let mut children = vec![expr];
    if let Some(a) = alias {
        children.push(AstNode::leaf(TokenKind::Identifier, a));
    }
    AstNode::node(TokenKind::SelExpr, children)
}

/// `*` or `tab.*`
pub fn all_col_ref(table: Option<&str>) -> AstNode {
    let children = match table {
        Some(t) => vec![AstNode::leaf(TokenKind::Identifier, t)],
        None => vec![],
    };
    AstNode::node(TokenKind::AllColRef, children)
}

/// Column reference, optionally qualified.
pub fn col_ref(table: Option<&str>, column: &str) -> AstNode {
    let mut children = Vec::new();
    if let Some(t) = table {
        children.push(AstNode::leaf(TokenKind::Identifier, t));
    }
    children.push(AstNode::leaf(TokenKind::Identifier, column));
    AstNode::node(TokenKind::ColRef, children)
}

/// Function call; `distinct` selects the DISTINCT variant.
pub fn func(name: &str, distinct: bool, args: Vec<AstNode>) -> AstNode {
    let kind = if distinct {
        TokenKind::FunctionDi
    } else {
        TokenKind::Function
    };
    let mut children = vec![AstNode::leaf(TokenKind::Identifier, name)];
    children.extend(args);
    AstNode::node(kind, children)
}

/// Binary operator node.
pub fn binary(kind: TokenKind, left: AstNode, right: AstNode) -> AstNode {
    AstNode::node(kind, vec![left, right])
}

/// Numeric literal.
pub fn number(text: &str) -> AstNode {
    AstNode::leaf(TokenKind::Number, text)
}

/// String literal.
pub fn string(text: &str) -> AstNode {
    AstNode::leaf(TokenKind::StringLiteral, text)
}

/// Boolean literal.
pub fn boolean(value: bool) -> AstNode {
    if value {
        AstNode::node(TokenKind::KwTrue, vec![])
    } else {
        AstNode::node(TokenKind::KwFalse, vec![])
    }
}

/// `TOK_WHERE(expr)`
pub fn where_clause(expr: AstNode) -> AstNode {
    AstNode::node(TokenKind::Where, vec![expr])
}

/// `TOK_GROUPBY(expr...)`
pub fn group_by(exprs: Vec<AstNode>) -> AstNode {
    AstNode::node(TokenKind::GroupBy, exprs)
}

/// `TOK_CLUSTERBY(expr...)`
pub fn cluster_by(exprs: Vec<AstNode>) -> AstNode {
    AstNode::node(TokenKind::ClusterBy, exprs)
}

/// `TOK_DISTRIBUTEBY(expr...)`
pub fn distribute_by(exprs: Vec<AstNode>) -> AstNode {
    AstNode::node(TokenKind::DistributeBy, exprs)
}

/// `TOK_SORTBY(sort col...)`; each entry carries its direction.
pub fn sort_by(cols: Vec<(AstNode, bool)>) -> AstNode {
    let children = cols
        .into_iter()
        .map(|(expr, asc)| {
            let kind = if asc {
                TokenKind::SortColNameAsc
            } else {
                TokenKind::SortColNameDesc
            };
            AstNode::node(kind, vec![expr])
        })
        .collect();
    AstNode::node(TokenKind::SortBy, children)
}

/// `TOK_LIMIT(n)`
pub fn limit(n: usize) -> AstNode {
    AstNode::node(
        TokenKind::Limit,
        vec![AstNode::leaf(TokenKind::Number, n.to_string())],
    )
}

/// `TOK_UNION(left, right)`
pub fn union(left: AstNode, right: AstNode) -> AstNode {
    AstNode::node(TokenKind::Union, vec![left, right])
}

/// `TOK_TRANSFORM(cols, script [, output aliases])`
pub fn transform(cols: Vec<AstNode>, script: &str, output_cols: Option<Vec<&str>>) -> AstNode {
    let mut children = vec![
        AstNode::node(TokenKind::AliasList, cols),
        AstNode::leaf(TokenKind::StringLiteral, script),
    ];
    if let Some(outs) = output_cols {
        children.push(AstNode::node(
            TokenKind::AliasList,
            outs.into_iter()
                .map(|c| AstNode::leaf(TokenKind::Identifier, c))
                .collect(),
        ));
    }
    AstNode::node(TokenKind::Transform, children)
}
