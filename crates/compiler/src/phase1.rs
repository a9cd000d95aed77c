//! Phase-1 analysis: one depth-first pass over the AST populating query
//! blocks with their clauses, aliases, sampling, and destinations.

use indexmap::IndexMap;
use qry_ast::{AstNode, TokenKind};
use qry_common::{ErrorKind, Result};
use qry_functions::Registry;
use tracing::debug;

use crate::qb::{QBExpr, QBExprKind, QBParseInfo, TableSample, QB};

/// Walk state: the current destination name and the insert-clause
/// counter.
#[derive(Debug)]
pub struct Phase1Ctx {
    pub dest: String,
    pub next_num: usize,
}

/// Initial walk state: clauses seen before any destination token belong
/// to the implicit `reduce` destination.
pub fn init_phase1_ctx() -> Phase1Ctx {
    Phase1Ctx {
        dest: "reduce".to_string(),
        next_num: 0,
    }
}

/// Build the QB expression for a (sub)query node: a plain block for
/// `TOK_QUERY`, a union of two for `TOK_UNION`.
pub fn do_phase1_qb_expr(
    ast: &AstNode,
    outer_id: Option<&str>,
    alias: &str,
    registry: &Registry,
) -> Result<QBExpr> {
    match ast.kind() {
        TokenKind::Query => {
            let mut qb = QB::new(outer_id, Some(alias), true);
            do_phase1(ast, &mut qb, &mut init_phase1_ctx(), registry)?;
            Ok(QBExpr {
                alias: alias.to_string(),
                kind: QBExprKind::Query(qb),
            })
        }
        TokenKind::Union => {
            let left = do_phase1_qb_expr(
                ast.expect_child(0)?,
                outer_id,
                &format!("{alias}-subquery1"),
                registry,
            )?;
            let right = do_phase1_qb_expr(
                ast.expect_child(1)?,
                outer_id,
                &format!("{alias}-subquery2"),
                registry,
            )?;
            Ok(QBExpr {
                alias: alias.to_string(),
                kind: QBExprKind::Union(Box::new(left), Box::new(right)),
            })
        }
        _ => Err(ast.error(ErrorKind::Generic).detail("expected query or union")),
    }
}

/// The phase-1 walk. Tokens with a dedicated action are handled here and
/// stop the recursion; everything else recurses into its children.
pub fn do_phase1(
    ast: &AstNode,
    qb: &mut QB,
    ctx: &mut Phase1Ctx,
    registry: &Registry,
) -> Result<()> {
    let mut skip_recursion = true;
    match ast.kind() {
        TokenKind::Select | TokenKind::SelectDi => {
            if ast.kind() == TokenKind::SelectDi {
                qb.count_sel_di();
            }
            qb.count_sel();
            qb.parse_info_mut().set_sel_expr(&ctx.dest, ast.clone());
            let aggregations = collect_aggregations(ast, registry);
            let distinct = distinct_func_expr(&aggregations)?;
            qb.parse_info_mut()
                .set_aggregations(&ctx.dest, aggregations);
            if let Some(d) = distinct {
                qb.parse_info_mut().set_distinct_func(&ctx.dest, d);
            }
        }

        TokenKind::Where => {
            qb.parse_info_mut().set_where_expr(&ctx.dest, ast.clone());
        }

        TokenKind::Destination => {
            ctx.dest = format!("insclause-{}", ctx.next_num);
            ctx.next_num += 1;

            // a subquery may only write to a synthetic temporary file
            if qb.parse_info().is_subquery() {
                let target = ast.expect_child(0)?;
                let is_tmp = target.kind() == TokenKind::Dir
                    && target
                        .child(0)
                        .map(|c| c.kind() == TokenKind::TmpFile)
                        .unwrap_or(false);
                if !is_tmp {
                    return Err(ast.error(ErrorKind::NoInsertInSubquery));
                }
            }

            qb.parse_info_mut()
                .set_dest(&ctx.dest, ast.expect_child(0)?.clone());
        }

        TokenKind::From => {
            if ast.child_count() != 1 {
                return Err(ast
                    .error(ErrorKind::Generic)
                    .detail(format!("FROM with {} children", ast.child_count())));
            }
            let frm = ast.expect_child(0)?;
            match frm.kind() {
                TokenKind::TabRef => process_table(qb, frm)?,
                TokenKind::Subquery => process_subquery(qb, frm, registry)?,
                kind if kind.is_join() => {
                    process_join(qb, frm, registry)?;
                    qb.parse_info_mut().set_join_expr(frm.clone());
                }
                _ => {
                    return Err(frm.error(ErrorKind::Generic).detail("unexpected FROM source"))
                }
            }
        }

        TokenKind::ClusterBy => {
            if qb.parse_info().distribute_by(&ctx.dest).is_some() {
                return Err(ast.error(ErrorKind::ClusterByDistributeByConflict));
            }
            if qb.parse_info().sort_by(&ctx.dest).is_some() {
                return Err(ast.error(ErrorKind::ClusterBySortByConflict));
            }
            qb.parse_info_mut().set_cluster_by(&ctx.dest, ast.clone());
        }

        TokenKind::DistributeBy => {
            if qb.parse_info().cluster_by(&ctx.dest).is_some() {
                return Err(ast.error(ErrorKind::ClusterByDistributeByConflict));
            }
            qb.parse_info_mut()
                .set_distribute_by(&ctx.dest, ast.clone());
        }

        TokenKind::SortBy => {
            if qb.parse_info().cluster_by(&ctx.dest).is_some() {
                return Err(ast.error(ErrorKind::ClusterBySortByConflict));
            }
            qb.parse_info_mut().set_sort_by(&ctx.dest, ast.clone());
        }

        TokenKind::GroupBy => {
            let is_distinct_select = qb
                .parse_info()
                .sel_expr(&ctx.dest)
                .map(|s| s.kind() == TokenKind::SelectDi)
                .unwrap_or(false);
            if is_distinct_select {
                return Err(ast.error(ErrorKind::SelectDistinctWithGroupBy));
            }
            qb.parse_info_mut().set_group_by(&ctx.dest, ast.clone());
        }

        TokenKind::Limit => {
            let n = ast
                .expect_child(0)?
                .text()
                .parse::<usize>()
                .map_err(|_| ast.error(ErrorKind::InvalidNumericalConstant))?;
            qb.parse_info_mut().set_limit(&ctx.dest, n);
        }

        TokenKind::Union => {
            // `q1 UNION ALL q2` is only allowed inside an aliased
            // subquery; a top-level union has nowhere to put its results.
            if !qb.parse_info().is_subquery() {
                return Err(ast.error(ErrorKind::UnionNotInSubquery));
            }
            skip_recursion = false;
        }

        _ => {
            skip_recursion = false;
        }
    }

    if !skip_recursion {
        for child in ast.children() {
            do_phase1(child, qb, ctx, registry)?;
        }
    }
    Ok(())
}

/// Record a table reference: name, optional sample, optional alias. The
/// alias defaults to the table name.
fn process_table(qb: &mut QB, tabref: &AstNode) -> Result<()> {
    let mut sample_present = false;
    let mut alias_index = 0;
    if tabref.child_count() == 2 {
        if tabref.expect_child(1)?.kind() == TokenKind::TableSample {
            sample_present = true;
        } else {
            alias_index = 1;
        }
    } else if tabref.child_count() == 3 {
        alias_index = 2;
        sample_present = true;
    }

    let alias_node = tabref.expect_child(alias_index)?;
    let alias = alias_node.text().to_string();
    if qb.exists(&alias) {
        return Err(alias_node.error(ErrorKind::AmbiguousTableAlias));
    }

    if sample_present {
        let sample_clause = tabref.expect_child(1)?;
        let cols: Vec<AstNode> = sample_clause.children().iter().skip(2).cloned().collect();
        if cols.len() > 2 {
            return Err(tabref.error(ErrorKind::SampleRestriction));
        }
        let numerator = parse_sample_number(sample_clause.expect_child(0)?)?;
        let denominator = parse_sample_number(sample_clause.expect_child(1)?)?;
        qb.parse_info_mut()
            .set_table_sample(&alias, TableSample::new(numerator, denominator, cols));
    }

    let table_tree = tabref.expect_child(0)?;
    let table_name = table_tree.text().to_string();
    qb.set_tab_alias(&alias, &table_name);
    qb.parse_info_mut()
        .set_src_for_alias(&alias, table_tree.clone());
    debug!(alias = %alias, table = %table_name, "recorded table reference");
    Ok(())
}

fn parse_sample_number(node: &AstNode) -> Result<usize> {
    node.text()
        .parse::<usize>()
        .map_err(|_| node.error(ErrorKind::InvalidNumericalConstant))
}

/// Record a subquery source; subqueries must carry an alias.
fn process_subquery(qb: &mut QB, subq: &AstNode, registry: &Registry) -> Result<()> {
    if subq.child_count() != 2 {
        return Err(subq.error(ErrorKind::NoSubqueryAlias));
    }
    let subqref = subq.expect_child(0)?;
    let alias_node = subq.expect_child(1)?;
    let alias = alias_node.text().to_string();

    let qbexpr = do_phase1_qb_expr(subqref, qb.id(), &alias, registry)?;
    if qb.exists(&alias) {
        return Err(alias_node.error(ErrorKind::AmbiguousTableAlias));
    }
    qb.set_subq_alias(&alias, qbexpr);
    Ok(())
}

/// Record every table/subquery under a join tree.
fn process_join(qb: &mut QB, join: &AstNode, registry: &Registry) -> Result<()> {
    let n = join.child_count();
    if n != 2 && n != 3 {
        return Err(join
            .error(ErrorKind::Generic)
            .detail(format!("join with {n} children")));
    }
    for child in join.children() {
        match child.kind() {
            TokenKind::TabRef => process_table(qb, child)?,
            TokenKind::Subquery => process_subquery(qb, child, registry)?,
            kind if kind.is_join() => process_join(qb, child, registry)?,
            _ => {}
        }
    }
    Ok(())
}

/// Aggregation subtrees of a select clause, keyed by canonical text so
/// structurally identical aggregations collapse into one.
fn collect_aggregations(sel_expr: &AstNode, registry: &Registry) -> IndexMap<String, AstNode> {
    let mut aggregations = IndexMap::new();
    for item in sel_expr.children() {
        if let Some(expr) = item.child(0) {
            collect_all_aggregations(expr, registry, &mut aggregations);
        }
    }
    aggregations
}

fn collect_all_aggregations(
    expr: &AstNode,
    registry: &Registry,
    aggregations: &mut IndexMap<String, AstNode>,
) {
    if matches!(expr.kind(), TokenKind::Function | TokenKind::FunctionDi) {
        if let Some(name_node) = expr.child(0) {
            if name_node.kind() == TokenKind::Identifier && registry.is_udaf(name_node.text()) {
                aggregations.insert(expr.string_tree(), expr.clone());
                return;
            }
        }
    }
    for child in expr.children() {
        collect_all_aggregations(child, registry, aggregations);
    }
}

/// The single DISTINCT aggregation of a clause; a second distinct
/// aggregation over different arguments is unsupported.
fn distinct_func_expr(aggregations: &IndexMap<String, AstNode>) -> Result<Option<AstNode>> {
    let mut expr: Option<AstNode> = None;
    for value in aggregations.values() {
        if value.kind() == TokenKind::FunctionDi {
            if let Some(prev) = &expr {
                return Err(prev.error(ErrorKind::UnsupportedMultipleDistincts));
            }
            expr = Some(value.clone());
        }
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use qry_ast::{build, TokenKind};
    use qry_common::ErrorKind;
    use qry_functions::Registry;

    use crate::qb::QB;

    use super::{do_phase1, init_phase1_ctx};

    fn analyze(ast: &qry_ast::AstNode) -> qry_common::Result<QB> {
        let registry = Registry::with_builtins();
        let mut qb = QB::new(None, None, false);
        do_phase1(ast, &mut qb, &mut init_phase1_ctx(), &registry)?;
        Ok(qb)
    }

    #[test]
    fn destinations_are_numbered() {
        let ast = build::query(
            build::from(build::tabref("src", None, None)),
            vec![
                build::insert(
                    build::dest_tmp_file(),
                    build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
                    vec![],
                ),
                build::insert(
                    build::dest_dir("/out", false),
                    build::select(
                        false,
                        vec![build::sel_expr(build::col_ref(None, "key"), None)],
                    ),
                    vec![],
                ),
            ],
        );
        let qb = analyze(&ast).expect("phase1");
        let names: Vec<&str> = qb.parse_info().clause_names().collect();
        assert_eq!(names, vec!["insclause-0", "insclause-1"]);
        assert!(qb.tab_aliases().any(|a| a == "src"));
    }

    #[test]
    fn duplicate_alias_is_ambiguous() {
        let ast = build::query(
            build::from(build::join(
                TokenKind::Join,
                build::tabref("src", None, Some("a")),
                build::tabref("other", None, Some("a")),
                build::binary(
                    TokenKind::Equal,
                    build::col_ref(Some("a"), "k"),
                    build::col_ref(Some("a"), "k"),
                ),
            )),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
                vec![],
            )],
        );
        let err = analyze(&ast).expect_err("dup alias");
        assert_eq!(err.kind(), ErrorKind::AmbiguousTableAlias);
    }

    #[test]
    fn select_distinct_with_group_by_is_rejected() {
        let ast = build::query(
            build::from(build::tabref("src", None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(
                    true,
                    vec![build::sel_expr(build::col_ref(None, "key"), None)],
                ),
                vec![build::group_by(vec![build::col_ref(None, "key")])],
            )],
        );
        let err = analyze(&ast).expect_err("distinct+groupby");
        assert_eq!(err.kind(), ErrorKind::SelectDistinctWithGroupBy);
    }

    #[test]
    fn two_different_distincts_are_unsupported() {
        let ast = build::query(
            build::from(build::tabref("src", None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(
                    false,
                    vec![
                        build::sel_expr(
                            build::func("count", true, vec![build::col_ref(None, "a")]),
                            None,
                        ),
                        build::sel_expr(
                            build::func("count", true, vec![build::col_ref(None, "b")]),
                            None,
                        ),
                    ],
                ),
                vec![],
            )],
        );
        let err = analyze(&ast).expect_err("two distincts");
        assert_eq!(err.kind(), ErrorKind::UnsupportedMultipleDistincts);
    }

    #[test]
    fn aggregations_deduplicate_by_structure() {
        let ast = build::query(
            build::from(build::tabref("src", None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(
                    false,
                    vec![
                        build::sel_expr(
                            build::func("sum", false, vec![build::col_ref(None, "v")]),
                            None,
                        ),
                        build::sel_expr(
                            build::func("sum", false, vec![build::col_ref(None, "v")]),
                            None,
                        ),
                    ],
                ),
                vec![],
            )],
        );
        let qb = analyze(&ast).expect("phase1");
        let aggs = qb
            .parse_info()
            .aggregations("insclause-0")
            .expect("aggregations");
        assert_eq!(aggs.len(), 1);
    }

    #[test]
    fn cluster_by_conflicts_with_sort_by() {
        let ast = build::query(
            build::from(build::tabref("src", None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(
                    false,
                    vec![build::sel_expr(build::col_ref(None, "key"), None)],
                ),
                vec![
                    build::sort_by(vec![(build::col_ref(None, "key"), true)]),
                    build::cluster_by(vec![build::col_ref(None, "key")]),
                ],
            )],
        );
        let err = analyze(&ast).expect_err("cluster+sort");
        assert_eq!(err.kind(), ErrorKind::ClusterBySortByConflict);
    }
}
