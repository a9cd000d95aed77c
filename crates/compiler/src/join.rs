//! Join planning: building the join tree from the AST, classifying ON
//! predicates into join conditions and filters, merging multi-way
//! equi-joins that share a left key, and lowering the tree to tagged
//! reduce-sink inputs feeding one join operator.

use arrow_schema::DataType;
use indexmap::IndexMap;
use qry_ast::{AstNode, TokenKind};
use qry_common::{ErrorKind, Result};
use qry_functions::type_name;

use crate::analyzer::SemanticAnalyzer;
use crate::ops::{OpHandle, OperatorDesc};
use crate::plan::descs::{
    JoinCondDesc, JoinDesc, JoinType, ReduceSinkDesc, RsPartitioning,
};
use crate::plan::exprs::ExprDesc;
use crate::qb::QB;
use crate::rowres::{ColumnInfo, RowResolver};
use crate::typecheck::get_func_expr_desc;

/// Join tree node: binary as parsed, multi-way after merging.
///
/// Positions index the inputs: position 0 is the left side (a base source
/// or the nested `join_src`), positions 1.. are right sides. The
/// per-position `expressions` lists hold the equality keys, aligned
/// across positions; `filters` hold single-sided predicates pushed onto
/// that input.
#[derive(Debug)]
pub struct JoinTree {
    pub left_alias: Option<String>,
    pub left_aliases: Vec<String>,
    pub right_aliases: Vec<String>,
    pub base_src: Vec<Option<String>>,
    pub join_src: Option<Box<JoinTree>>,
    pub join_cond: Vec<JoinCondDesc>,
    pub expressions: Vec<Vec<AstNode>>,
    pub filters: Vec<Vec<AstNode>>,
    pub no_outer_join: bool,
    next_tag: i32,
}

impl JoinTree {
    fn new(join_type: JoinType) -> Self {
        JoinTree {
            left_alias: None,
            left_aliases: Vec::new(),
            right_aliases: Vec::new(),
            base_src: vec![None, None],
            join_src: None,
            join_cond: vec![JoinCondDesc {
                left: 0,
                right: 1,
                join_type,
            }],
            expressions: vec![Vec::new(), Vec::new()],
            filters: vec![Vec::new(), Vec::new()],
            no_outer_join: join_type == JoinType::Inner,
            next_tag: 0,
        }
    }

    /// Allocate the next input tag.
    pub fn next_tag(&mut self) -> i32 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }
}

/// Alias of a table or subquery reference inside a join: the explicit
/// alias when present, the table name otherwise.
fn ref_alias(node: &AstNode) -> Result<String> {
    let table_name = node.expect_child(0)?.text().to_string();
    if node.child_count() == 1 {
        Ok(table_name)
    } else {
        Ok(node
            .expect_child(node.child_count() - 1)?
            .text()
            .to_lowercase())
    }
}

/// Build one binary join-tree node from a join AST node, recursing into
/// a joined left child.
pub fn gen_join_tree(join_node: &AstNode) -> Result<JoinTree> {
    let join_type = match join_node.kind() {
        TokenKind::LeftOuterJoin => JoinType::LeftOuter,
        TokenKind::RightOuterJoin => JoinType::RightOuter,
        TokenKind::FullOuterJoin => JoinType::FullOuter,
        _ => JoinType::Inner,
    };
    let mut tree = JoinTree::new(join_type);

    let left = join_node.expect_child(0)?;
    let right = join_node.expect_child(1)?;

    match left.kind() {
        TokenKind::TabRef | TokenKind::Subquery => {
            let alias = ref_alias(left)?;
            tree.left_alias = Some(alias.clone());
            tree.left_aliases = vec![alias.clone()];
            tree.base_src[0] = Some(alias);
        }
        kind if kind.is_join() => {
            let left_tree = gen_join_tree(left)?;
            let mut left_aliases = left_tree.left_aliases.clone();
            left_aliases.push(left_tree.right_aliases[0].clone());
            tree.left_aliases = left_aliases;
            tree.join_src = Some(Box::new(left_tree));
        }
        _ => return Err(left.error(ErrorKind::Generic).detail("unexpected join input")),
    }

    match right.kind() {
        TokenKind::TabRef | TokenKind::Subquery => {
            let alias = ref_alias(right)?;
            tree.right_aliases = vec![alias.clone()];
            tree.base_src[1] = Some(alias);
        }
        _ => {
            return Err(right
                .error(ErrorKind::Generic)
                .detail("right side of a join must be a table or subquery"))
        }
    }

    let cond = join_node.expect_child(2)?;
    let mut left_src: Vec<String> = Vec::new();
    parse_join_condition(&mut tree, cond, &mut left_src)?;
    if left_src.len() == 1 {
        tree.left_alias = Some(left_src[0].clone());
    }

    Ok(tree)
}

/// Collect which side(s) of the join a condition subtree references.
fn populate_alias_refs(
    tree: &JoinTree,
    condn: &AstNode,
    left_refs: &mut Vec<String>,
    right_refs: &mut Vec<String>,
) -> Result<()> {
    match condn.kind() {
        TokenKind::ColRef => {
            let tbl = condn.expect_child(0)?.text().to_lowercase();
            if tree.left_aliases.iter().any(|a| *a == tbl) {
                if !left_refs.contains(&tbl) {
                    left_refs.push(tbl);
                }
            } else if tree.right_aliases.iter().any(|a| *a == tbl) {
                if !right_refs.contains(&tbl) {
                    right_refs.push(tbl);
                }
            } else {
                return Err(condn.error(ErrorKind::InvalidTableAlias));
            }
            Ok(())
        }
        TokenKind::Number
        | TokenKind::StringLiteral
        | TokenKind::CharsetLiteral
        | TokenKind::KwTrue
        | TokenKind::KwFalse => Ok(()),
        TokenKind::Function | TokenKind::FunctionDi => {
            for arg in condn.children().iter().skip(1) {
                populate_alias_refs(tree, arg, left_refs, right_refs)?;
            }
            Ok(())
        }
        _ => {
            match condn.child_count() {
                1 | 2 => {
                    for c in condn.children() {
                        populate_alias_refs(tree, c, left_refs, right_refs)?;
                    }
                    Ok(())
                }
                n => Err(condn
                    .error(ErrorKind::Generic)
                    .detail(format!("join condition operand with {n} children"))),
            }
        }
    }
}

/// File one side of an equality under the position it references.
fn populate_aliases(
    tree: &mut JoinTree,
    left_refs: &[String],
    right_refs: &[String],
    condn: &AstNode,
    left_src: &mut Vec<String>,
) -> Result<()> {
    if !left_refs.is_empty() && !right_refs.is_empty() {
        return Err(condn.error(ErrorKind::InvalidJoinCondition1));
    }
    if !right_refs.is_empty() {
        tree.expressions[1].push(condn.clone());
    } else if !left_refs.is_empty() {
        tree.expressions[0].push(condn.clone());
        for a in left_refs {
            if !left_src.contains(a) {
                left_src.push(a.clone());
            }
        }
    } else {
        return Err(condn.error(ErrorKind::InvalidJoinCondition2));
    }
    Ok(())
}

/// Classify the ON condition: equalities referencing both sides become
/// join keys, single-sided predicates become filters, OR is rejected,
/// and a non-equality spanning both sides is rejected.
fn parse_join_condition(
    tree: &mut JoinTree,
    cond: &AstNode,
    left_src: &mut Vec<String>,
) -> Result<()> {
    match cond.kind() {
        TokenKind::KwOr => Err(cond.error(ErrorKind::InvalidJoinCondition3)),

        TokenKind::KwAnd => {
            parse_join_condition(tree, cond.expect_child(0)?, left_src)?;
            parse_join_condition(tree, cond.expect_child(1)?, left_src)
        }

        TokenKind::Equal => {
            let left_operand = cond.expect_child(0)?;
            let mut ll = Vec::new();
            let mut lr = Vec::new();
            populate_alias_refs(tree, left_operand, &mut ll, &mut lr)?;

            let right_operand = cond.expect_child(1)?;
            let mut rl = Vec::new();
            let mut rr = Vec::new();
            populate_alias_refs(tree, right_operand, &mut rl, &mut rr)?;

            if (!ll.is_empty() && !lr.is_empty()) || (!rl.is_empty() && !rr.is_empty()) {
                return Err(cond.error(ErrorKind::InvalidJoinCondition1));
            }

            if !ll.is_empty() {
                if !rl.is_empty() || (rl.is_empty() && rr.is_empty()) {
                    tree.filters[0].push(cond.clone());
                } else {
                    populate_aliases(tree, &ll, &lr, left_operand, left_src)?;
                    populate_aliases(tree, &rl, &rr, right_operand, left_src)?;
                }
            } else if !lr.is_empty() {
                if !rr.is_empty() || (rl.is_empty() && rr.is_empty()) {
                    tree.filters[1].push(cond.clone());
                } else {
                    populate_aliases(tree, &ll, &lr, left_operand, left_src)?;
                    populate_aliases(tree, &rl, &rr, right_operand, left_src)?;
                }
            } else if !rl.is_empty() {
                tree.filters[0].push(cond.clone());
            } else {
                tree.filters[1].push(cond.clone());
            }
            Ok(())
        }

        _ => {
            // non-equality predicate: a filter when single-sided
            let mut left_refs = Vec::new();
            let mut right_refs = Vec::new();
            let skip = usize::from(cond.kind() == TokenKind::Function);
            for operand in cond.children().iter().skip(skip) {
                populate_alias_refs(tree, operand, &mut left_refs, &mut right_refs)?;
            }
            if !left_refs.is_empty() && !right_refs.is_empty() {
                return Err(cond.error(ErrorKind::InvalidJoinCondition1));
            }
            if !left_refs.is_empty() {
                tree.filters[0].push(cond.clone());
            } else {
                tree.filters[1].push(cond.clone());
            }
            Ok(())
        }
    }
}

/// Position of `target` that `node` can merge into: the position whose
/// alias is `node`'s left alias and whose key expressions structurally
/// equal `node`'s left-side keys.
fn find_merge_pos(node: &JoinTree, target: &JoinTree) -> Option<usize> {
    let left_alias = node.left_alias.as_deref()?;

    let (pos, target_keys) = if target.left_alias.as_deref() == Some(left_alias) {
        (0, &target.expressions[0])
    } else {
        let i = target
            .right_aliases
            .iter()
            .position(|a| a == left_alias)?;
        (i + 1, &target.expressions[i + 1])
    };

    let node_keys = &node.expressions[0];
    if node_keys.len() != target_keys.len() {
        return None;
    }
    for (n, t) in node_keys.iter().zip(target_keys.iter()) {
        if n.string_tree() != t.string_tree() {
            return None;
        }
    }
    Some(pos)
}

/// Absorb `node` into `target` at position `pos`: concatenate right
/// aliases, base sources, key expressions, filters, and join conditions,
/// re-basing the condition indices onto the target.
fn merge_joins(node: JoinTree, target: &mut JoinTree, pos: usize) {
    target.right_aliases.extend(node.right_aliases);

    // base_src[0] belongs to the left side; only right positions move.
    target
        .base_src
        .extend(node.base_src.into_iter().skip(1));

    let mut exprs = node.expressions.into_iter();
    let node_left_filters = {
        let mut filters = node.filters.into_iter();
        let left = filters.next().unwrap_or_default();
        let _left_exprs = exprs.next();
        for (e, f) in exprs.zip(filters) {
            target.expressions.push(e);
            target.filters.push(f);
        }
        left
    };
    if !node_left_filters.is_empty() {
        target.filters[pos].extend(node_left_filters);
    }

    if node.no_outer_join && target.no_outer_join {
        target.no_outer_join = true;
    } else {
        target.no_outer_join = false;
    }

    let target_conds = target.join_cond.len();
    for mut cond in node.join_cond {
        cond.left = if cond.left == 0 {
            pos
        } else {
            cond.left + target_conds
        };
        cond.right += target_conds;
        target.join_cond.push(cond);
    }
}

/// Merge every join node that shares a left key with a deeper node, until
/// no two nodes remain mergeable.
pub fn merge_join_tree(qb: &mut QB) {
    let root = match qb.take_join_tree() {
        Some(t) => t,
        None => return,
    };

    // Flatten the left-deep chain (root first) so merging is index play
    // instead of re-linking boxes.
    let mut chain: Vec<JoinTree> = Vec::new();
    let mut cur = Some(Box::new(root));
    while let Some(mut node) = cur {
        cur = node.join_src.take();
        chain.push(*node);
    }

    'outer: loop {
        for i in 0..chain.len() {
            for j in (i + 1)..chain.len() {
                if let Some(pos) = find_merge_pos(&chain[i], &chain[j]) {
                    let node = chain.remove(i);
                    merge_joins(node, &mut chain[j - 1], pos);
                    continue 'outer;
                }
            }
        }
        break;
    }

    // Re-link the remaining chain.
    let mut rebuilt: Option<Box<JoinTree>> = None;
    while let Some(mut node) = chain.pop() {
        node.join_src = rebuilt;
        rebuilt = Some(Box::new(node));
    }
    qb.set_join_tree(rebuilt.map(|b| *b));
}

impl SemanticAnalyzer<'_> {
    /// Emit the per-side join filters as filter operators on top of each
    /// base input.
    pub(crate) fn push_join_filters(
        &mut self,
        tree: &JoinTree,
        alias_to_op: &mut IndexMap<String, OpHandle>,
    ) -> Result<()> {
        if let Some(child) = &tree.join_src {
            self.push_join_filters(child, alias_to_op)?;
        }
        for (pos, src) in tree.base_src.iter().enumerate() {
            if let Some(alias) = src {
                let mut op = *alias_to_op.get(alias).expect("join input planned");
                for cond in &tree.filters[pos] {
                    op = self.gen_filter_for_cond(cond, op)?;
                }
                alias_to_op.insert(alias.clone(), op);
            }
        }
        Ok(())
    }

    /// Lower the merged join tree to operators.
    pub(crate) fn gen_join_plan(
        &mut self,
        qb: &mut QB,
        alias_to_op: &mut IndexMap<String, OpHandle>,
    ) -> Result<OpHandle> {
        let mut tree = qb.take_join_tree().expect("join tree present");
        let op = self.gen_join_operator(&mut tree, alias_to_op)?;
        qb.set_join_tree(Some(tree));
        Ok(op)
    }

    fn gen_join_operator(
        &mut self,
        tree: &mut JoinTree,
        alias_to_op: &mut IndexMap<String, OpHandle>,
    ) -> Result<OpHandle> {
        let left_sink = if tree.join_src.is_some() {
            let mut child = tree.join_src.take().expect("join src");
            let mut join_op = self.gen_join_operator(&mut child, alias_to_op)?;
            tree.join_src = Some(child);
            for cond in &tree.filters[0].clone() {
                join_op = self.gen_filter_for_cond(cond, join_op)?;
            }
            Some(self.gen_join_reduce_sink_child(tree, join_op, 0)?)
        } else {
            None
        };

        let mut src_sinks: Vec<Option<OpHandle>> = Vec::with_capacity(tree.base_src.len());
        let base_src = tree.base_src.clone();
        for (pos, src) in base_src.iter().enumerate() {
            match src {
                Some(alias) => {
                    let src_op = *alias_to_op.get(alias).expect("join input planned");
                    src_sinks.push(Some(self.gen_join_reduce_sink_child(tree, src_op, pos)?));
                }
                None => {
                    debug_assert_eq!(pos, 0);
                    src_sinks.push(None);
                }
            }
        }

        self.unify_join_keys(left_sink, &src_sinks)?;
        self.gen_join_operator_children(tree, left_sink, &src_sinks)
    }

    /// Reduce sink for one join input: sort key is the side's join-key
    /// expressions, value is the full input row re-exposed as `VALUE.j`.
    fn gen_join_reduce_sink_child(
        &mut self,
        tree: &mut JoinTree,
        child: OpHandle,
        pos: usize,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(child).clone();
        let mut output_rr = RowResolver::new();

        let mut reduce_keys = Vec::new();
        for expr in &tree.expressions[pos] {
            reduce_keys.push(self.gen_expr(expr, &input_rr)?);
        }

        let mut reduce_values = Vec::new();
        let table_names: Vec<String> = input_rr.table_names().map(|s| s.to_string()).collect();
        for src in &table_names {
            let fields = input_rr.field_map(src).expect("alias fields").clone();
            for (field, info) in fields {
                reduce_values.push(ExprDesc::column(
                    info.data_type.clone(),
                    info.internal_name.clone(),
                ));
                if output_rr.get(src, &field).is_none() {
                    output_rr.put(
                        src,
                        &field,
                        ColumnInfo::new(
                            format!("VALUE.{}", reduce_values.len() - 1),
                            info.data_type.clone(),
                        ),
                    );
                }
            }
        }

        let key_types = reduce_keys.iter().map(|k| k.data_type()).collect();
        let num_keys = reduce_keys.len();
        let desc = ReduceSinkDesc {
            key_cols: reduce_keys,
            value_cols: reduce_values,
            tag: tree.next_tag(),
            partitioning: RsPartitioning::KeyPrefix(num_keys),
            order: String::new(),
            num_reducers: None,
            key_types,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::ReduceSink(desc), output_rr, child))
    }

    /// Unify the k-th key type across every input: compute the common
    /// class, wrap non-conforming keys in conversions, and refresh each
    /// sink's key schema.
    fn unify_join_keys(
        &mut self,
        left: Option<OpHandle>,
        right: &[Option<OpHandle>],
    ) -> Result<()> {
        let inputs: Vec<OpHandle> = right
            .iter()
            .enumerate()
            .map(|(i, op)| match op {
                Some(h) => *h,
                None => {
                    debug_assert_eq!(i, 0);
                    left.expect("left sink for merged join")
                }
            })
            .collect();

        let key_lists: Vec<Vec<ExprDesc>> = inputs
            .iter()
            .map(|h| match self.arena.desc(*h) {
                OperatorDesc::ReduceSink(rs) => rs.key_cols.clone(),
                _ => unreachable!("join input is a reduce sink"),
            })
            .collect();
        let key_len = key_lists.first().map(|k| k.len()).unwrap_or(0);

        let mut unified = key_lists;
        for k in 0..key_len {
            let mut common: DataType = unified[0][k].data_type();
            for keys in unified.iter().skip(1) {
                let b = keys[k].data_type();
                common = qry_functions::common_class(&common, &b).ok_or_else(|| {
                    ErrorKind::Generic.with(format!(
                        "cannot do equality join on different types: {common:?} and {b:?}"
                    ))
                })?;
            }
            for keys in unified.iter_mut() {
                if keys[k].data_type() != common {
                    let name = type_name(&common).ok_or_else(|| {
                        ErrorKind::Generic.with(format!("no conversion to {common:?}"))
                    })?;
                    keys[k] =
                        get_func_expr_desc(self.registry, name, vec![keys[k].clone()])?;
                }
            }
        }

        for (h, keys) in inputs.iter().zip(unified) {
            if let OperatorDesc::ReduceSink(rs) = &mut self.arena.node_mut(*h).desc {
                rs.key_types = keys.iter().map(|k| k.data_type()).collect();
                rs.key_cols = keys;
            }
        }
        Ok(())
    }

    /// The join operator itself: per-tag value expressions over each
    /// input's `VALUE.*` columns, positional output columns.
    fn gen_join_operator_children(
        &mut self,
        tree: &JoinTree,
        left: Option<OpHandle>,
        right: &[Option<OpHandle>],
    ) -> Result<OpHandle> {
        let mut output_rr = RowResolver::new();
        let mut expr_map: IndexMap<u8, Vec<ExprDesc>> = IndexMap::new();
        let mut parents: Vec<OpHandle> = Vec::with_capacity(right.len());
        let mut output_pos = 0usize;

        for input in right {
            let input = match input {
                Some(h) => *h,
                None => left.expect("left sink for merged join"),
            };
            let tag = match self.arena.desc(input) {
                OperatorDesc::ReduceSink(rs) => rs.tag as u8,
                _ => unreachable!("join input is a reduce sink"),
            };
            let input_rr = self.arena.row_resolver(input).clone();
            let mut value_exprs = Vec::new();
            for src in input_rr.table_names().map(|s| s.to_string()).collect::<Vec<_>>() {
                let fields = input_rr.field_map(&src).expect("alias fields").clone();
                for (field, info) in fields {
                    value_exprs.push(ExprDesc::column(
                        info.data_type.clone(),
                        info.internal_name.clone(),
                    ));
                    if output_rr.get(&src, &field).is_none() {
                        output_rr.put(
                            &src,
                            &field,
                            ColumnInfo::new(output_pos.to_string(), info.data_type.clone()),
                        );
                        output_pos += 1;
                    }
                }
            }
            expr_map.insert(tag, value_exprs);
            parents.push(input);
        }

        let desc = JoinDesc {
            exprs: expr_map,
            conds: tree.join_cond.clone(),
        };
        Ok(self
            .arena
            .make_child_of_all(OperatorDesc::Join(desc), output_rr, &parents))
    }
}

#[cfg(test)]
mod tests {
    use qry_ast::{build, TokenKind};
    use qry_common::ErrorKind;

    use crate::plan::descs::JoinType;
    use crate::qb::QB;

    use super::{gen_join_tree, merge_join_tree};

    fn eq(l: &str, lc: &str, r: &str, rc: &str) -> qry_ast::AstNode {
        build::binary(
            TokenKind::Equal,
            build::col_ref(Some(l), lc),
            build::col_ref(Some(r), rc),
        )
    }

    #[test]
    fn or_in_join_condition_is_rejected() {
        let join = build::join(
            TokenKind::Join,
            build::tabref("a", None, None),
            build::tabref("b", None, None),
            qry_ast::AstNode::node(
                TokenKind::KwOr,
                vec![eq("a", "k", "b", "k"), eq("a", "v", "b", "v")],
            ),
        );
        let err = gen_join_tree(&join).expect_err("or");
        assert_eq!(err.kind(), ErrorKind::InvalidJoinCondition3);
    }

    #[test]
    fn both_sides_in_one_term_is_rejected() {
        let join = build::join(
            TokenKind::Join,
            build::tabref("a", None, None),
            build::tabref("b", None, None),
            build::binary(
                TokenKind::Equal,
                build::binary(
                    TokenKind::Plus,
                    build::col_ref(Some("a"), "k"),
                    build::col_ref(Some("b"), "k"),
                ),
                build::number("1"),
            ),
        );
        let err = gen_join_tree(&join).expect_err("both sides");
        assert_eq!(err.kind(), ErrorKind::InvalidJoinCondition1);
    }

    #[test]
    fn single_sided_equality_is_a_filter() {
        let join = build::join(
            TokenKind::Join,
            build::tabref("a", None, None),
            build::tabref("b", None, None),
            qry_ast::AstNode::node(
                TokenKind::KwAnd,
                vec![
                    eq("a", "k", "b", "k"),
                    build::binary(
                        TokenKind::Equal,
                        build::col_ref(Some("b"), "v"),
                        build::number("10"),
                    ),
                ],
            ),
        );
        let tree = gen_join_tree(&join).expect("tree");
        assert_eq!(tree.expressions[0].len(), 1);
        assert_eq!(tree.expressions[1].len(), 1);
        assert_eq!(tree.filters[1].len(), 1);
        assert!(tree.filters[0].is_empty());
    }

    #[test]
    fn shared_left_key_joins_merge_into_three_way() {
        // a JOIN b ON a.k = b.k JOIN c ON a.k = c.k
        let inner = build::join(
            TokenKind::Join,
            build::tabref("a", None, None),
            build::tabref("b", None, None),
            eq("a", "k", "b", "k"),
        );
        let outer = build::join(
            TokenKind::Join,
            inner,
            build::tabref("c", None, None),
            eq("a", "k", "c", "k"),
        );
        let mut qb = QB::new(None, None, false);
        qb.set_join_tree(Some(gen_join_tree(&outer).expect("tree")));
        merge_join_tree(&mut qb);

        let tree = qb.join_tree().expect("merged");
        assert!(tree.join_src.is_none(), "chain fully merged");
        assert_eq!(tree.right_aliases, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(tree.base_src.len(), 3);
        assert_eq!(tree.expressions.len(), 3);
        let key_counts: Vec<usize> = tree.expressions.iter().map(|e| e.len()).collect();
        assert_eq!(key_counts, vec![1, 1, 1]);
        assert_eq!(tree.join_cond.len(), 2);
        assert!(tree.no_outer_join);
    }

    #[test]
    fn differing_keys_do_not_merge() {
        let inner = build::join(
            TokenKind::Join,
            build::tabref("a", None, None),
            build::tabref("b", None, None),
            eq("a", "k", "b", "k"),
        );
        let outer = build::join(
            TokenKind::LeftOuterJoin,
            inner,
            build::tabref("c", None, None),
            eq("a", "v", "c", "v"),
        );
        let mut qb = QB::new(None, None, false);
        qb.set_join_tree(Some(gen_join_tree(&outer).expect("tree")));
        merge_join_tree(&mut qb);

        let tree = qb.join_tree().expect("root");
        assert!(tree.join_src.is_some(), "chain must stay nested");
        assert_eq!(tree.join_cond[0].join_type, JoinType::LeftOuter);
    }
}
