//! Plan shapes beyond the aggregation/join scenarios: writes with moves,
//! UNION ALL subqueries, TRANSFORM scripts, re-sorting, and limits.

use arrow_schema::{DataType, Field};
use qry_ast::{build, AstNode, TokenKind};
use qry_common::{CompilerConfig, ErrorKind, SessionId};
use qry_compiler::{CompiledQuery, Context, OpHandle, OperatorDesc, SemanticAnalyzer, TaskWork};
use qry_functions::Registry;
use qry_metastore::{MemMetastore, Table};

fn metastore() -> MemMetastore {
    let mut ms = MemMetastore::new();
    ms.register_table(Table::new(
        "src",
        vec![
            Field::new("key", DataType::Utf8, true),
            Field::new("value", DataType::Int32, true),
        ],
        "/warehouse/src",
    ));
    ms.register_table(Table::new(
        "src2",
        vec![
            Field::new("key", DataType::Utf8, true),
            Field::new("value", DataType::Int32, true),
        ],
        "/warehouse/src2",
    ));
    ms.register_table(Table::new(
        "dest",
        vec![
            Field::new("key", DataType::Utf8, true),
            Field::new("cnt", DataType::Float64, true),
        ],
        "/warehouse/dest",
    ));
    ms
}

fn compile(ms: &MemMetastore, ast: &AstNode) -> qry_common::Result<CompiledQuery> {
    let registry = Registry::with_builtins();
    let mut analyzer = SemanticAnalyzer::with_context(
        Context::with_session_id(CompilerConfig::default(), SessionId(4)),
        ms,
        &registry,
    );
    analyzer.analyze(ast)
}

fn ops_named(compiled: &CompiledQuery, name: &str) -> Vec<OpHandle> {
    compiled
        .ctx
        .arena
        .handles()
        .filter(|h| compiled.ctx.arena.name(*h) == name)
        .collect()
}

#[test]
fn insert_into_table_adds_conversion_and_move() {
    let ms = metastore();
    // count(1) yields bigint; the destination column is double
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tab("dest"),
            build::select(
                false,
                vec![
                    build::sel_expr(build::col_ref(None, "key"), None),
                    build::sel_expr(build::func("count", false, vec![build::number("1")]), None),
                ],
            ),
            vec![build::group_by(vec![build::col_ref(None, "key")])],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    // conversion select between body select and file sink
    let sinks = ops_named(&compiled, "FS");
    assert_eq!(sinks.len(), 1);
    let fs_parent = compiled.ctx.arena.node(sinks[0]).parents[0];
    match compiled.ctx.arena.desc(fs_parent) {
        OperatorDesc::Select(sel) => {
            let rendered = format!("{}", sel.col_list[1]);
            assert!(rendered.contains("double"), "conversion wrap: {rendered}");
        }
        other => panic!("expected conversion select, got {other:?}"),
    }

    assert_eq!(compiled.ctx.load_table_work.len(), 1);
    assert!(compiled.ctx.load_file_work.is_empty());
    assert!(compiled.tasks.fetch_task.is_none());

    // the terminal job feeds the move task
    let mv = compiled
        .tasks
        .tasks
        .iter()
        .find(|t| matches!(t.work, TaskWork::Move(_)))
        .expect("move task");
    assert!(!mv.parents.is_empty());
}

#[test]
fn insert_into_partition_records_partition_spec() {
    let mut ms = metastore();
    ms.register_table(
        Table::new(
            "destpart",
            vec![Field::new("key", DataType::Utf8, true)],
            "/warehouse/destpart",
        )
        .partitioned_by(vec!["ds"]),
    );
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_partition("destpart", vec![("ds", "2009-01-01")]),
            build::select(
                false,
                vec![build::sel_expr(build::col_ref(None, "key"), None)],
            ),
            vec![],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    assert_eq!(compiled.ctx.load_table_work.len(), 1);
    let load = &compiled.ctx.load_table_work[0];
    assert_eq!(
        load.partition_spec.get("ds").map(|s| s.as_str()),
        Some("2009-01-01")
    );
    assert!(load.source_dir.contains("insclause-0"), "{}", load.source_dir);
}

#[test]
fn union_all_subquery_plans_through_forward() {
    let ms = metastore();
    let branch = |table: &str| {
        build::query(
            build::from(build::tabref(table, None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(
                    false,
                    vec![build::sel_expr(build::col_ref(None, "key"), None)],
                ),
                vec![],
            )],
        )
    };
    let ast = build::query(
        build::from(build::subquery(
            build::union(branch("src"), branch("src2")),
            "u",
        )),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
            vec![],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    let forwards = ops_named(&compiled, "FOR");
    assert_eq!(forwards.len(), 1);
    assert_eq!(compiled.ctx.arena.node(forwards[0]).parents.len(), 2);

    // each branch is its own map-only job writing the shared output
    assert_eq!(compiled.tasks.mapred_tasks().count(), 2);
    assert!(compiled.tasks.fetch_task.is_some());
}

#[test]
fn top_level_union_is_rejected() {
    let ms = metastore();
    let branch = |table: &str| {
        build::query(
            build::from(build::tabref(table, None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(
                    false,
                    vec![build::sel_expr(build::col_ref(None, "key"), None)],
                ),
                vec![],
            )],
        )
    };
    let ast = build::union(branch("src"), branch("src2"));
    let err = compile(&ms, &ast).expect_err("top-level union");
    assert_eq!(err.kind(), ErrorKind::UnionNotInSubquery);
}

#[test]
fn transform_appends_script_operator_with_string_schema() {
    let ms = metastore();
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![build::sel_expr(
                    build::transform(
                        vec![build::col_ref(None, "key"), build::col_ref(None, "value")],
                        "/bin/cat",
                        None,
                    ),
                    None,
                )],
            ),
            vec![],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    let scripts = ops_named(&compiled, "SCR");
    assert_eq!(scripts.len(), 1);
    match compiled.ctx.arena.desc(scripts[0]) {
        OperatorDesc::Script(s) => {
            assert_eq!(s.cmd, "/bin/cat");
            assert_eq!(s.output_info.columns, vec!["key".to_string(), "value".to_string()]);
        }
        _ => unreachable!(),
    }
    let rr = compiled.ctx.arena.row_resolver(scripts[0]);
    for info in rr.column_infos() {
        assert_eq!(info.data_type, DataType::Utf8, "script output is strings");
    }
}

#[test]
fn transform_with_other_select_items_is_rejected() {
    let ms = metastore();
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![
                    build::sel_expr(build::col_ref(None, "key"), None),
                    build::sel_expr(
                        build::transform(vec![build::col_ref(None, "value")], "/bin/cat", None),
                        None,
                    ),
                ],
            ),
            vec![],
        )],
    );
    let err = compile(&ms, &ast).expect_err("transform mix");
    assert_eq!(err.kind(), ErrorKind::InvalidTransform);
}

#[test]
fn cluster_by_adds_shuffle_and_extract() {
    let ms = metastore();
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![
                    build::sel_expr(build::col_ref(None, "key"), None),
                    build::sel_expr(build::col_ref(None, "value"), None),
                ],
            ),
            vec![build::cluster_by(vec![build::col_ref(None, "key")])],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    let sinks = ops_named(&compiled, "RS");
    assert_eq!(sinks.len(), 1);
    match compiled.ctx.arena.desc(sinks[0]) {
        OperatorDesc::ReduceSink(rs) => {
            assert_eq!(rs.key_cols.len(), 1);
            assert_eq!(rs.effective_order(), "+");
            match &rs.partitioning {
                qry_compiler::plan::descs::RsPartitioning::Cols(cols) => {
                    assert_eq!(cols.len(), 1)
                }
                other => panic!("cluster by partitions by columns, got {other:?}"),
            }
        }
        _ => unreachable!(),
    }
    let extracts = ops_named(&compiled, "EX");
    assert_eq!(extracts.len(), 1);

    // one job whose reducer holds the extract chain
    let task = compiled.tasks.mapred_tasks().next().expect("job");
    match &task.work {
        TaskWork::MapRed(work) => {
            assert_eq!(work.reducer, Some(extracts[0]));
        }
        _ => unreachable!(),
    }
}

#[test]
fn sort_by_descending_records_order() {
    let ms = metastore();
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![
                    build::sel_expr(build::col_ref(None, "key"), None),
                    build::sel_expr(build::col_ref(None, "value"), None),
                ],
            ),
            vec![build::sort_by(vec![
                (build::col_ref(None, "key"), true),
                (build::col_ref(None, "value"), false),
            ])],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");
    let sinks = ops_named(&compiled, "RS");
    match compiled.ctx.arena.desc(sinks[0]) {
        OperatorDesc::ReduceSink(rs) => assert_eq!(rs.order, "+-"),
        _ => unreachable!(),
    }
}

#[test]
fn subquery_limit_gets_single_reducer_cap() {
    let ms = metastore();
    let inner = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![build::sel_expr(build::col_ref(None, "key"), None)],
            ),
            vec![build::limit(5)],
        )],
    );
    let ast = build::query(
        build::from(build::subquery(inner, "t")),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
            vec![build::limit(3)],
        )],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    // inner limit runs once per mapper and once after a single-reducer
    // shuffle; the outer cap is applied by the fetch step
    let limits = ops_named(&compiled, "LIM");
    assert_eq!(limits.len(), 3);
    let sinks = ops_named(&compiled, "RS");
    assert_eq!(sinks.len(), 1);
    match compiled.ctx.arena.desc(sinks[0]) {
        OperatorDesc::ReduceSink(rs) => assert_eq!(rs.num_reducers, Some(1)),
        _ => unreachable!(),
    }

    let fetch = compiled.tasks.fetch_task.expect("fetch");
    match &compiled.tasks.task(fetch).work {
        TaskWork::Fetch(work) => assert_eq!(work.limit, Some(3)),
        _ => unreachable!(),
    }
}

#[test]
fn ambiguous_unqualified_column_across_join_inputs_fails() {
    let ms = metastore();
    let joined = build::join(
        TokenKind::Join,
        build::tabref("src", None, Some("a")),
        build::tabref("src2", None, Some("b")),
        build::binary(
            TokenKind::Equal,
            build::col_ref(Some("a"), "key"),
            build::col_ref(Some("b"), "key"),
        ),
    );
    let ast = build::query(
        build::from(joined),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![build::sel_expr(build::col_ref(None, "value"), None)],
            ),
            vec![],
        )],
    );
    let err = compile(&ms, &ast).expect_err("ambiguous");
    assert_eq!(err.kind(), ErrorKind::AmbiguousColumn);
}

#[test]
fn multi_insert_shares_one_scan() {
    let ms = metastore();
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![
            build::insert(
                build::dest_dir("/out/a", false),
                build::select(
                    false,
                    vec![build::sel_expr(build::col_ref(None, "key"), None)],
                ),
                vec![],
            ),
            build::insert(
                build::dest_dir("/out/b", false),
                build::select(
                    false,
                    vec![build::sel_expr(build::col_ref(None, "value"), None)],
                ),
                vec![],
            ),
        ],
    );
    let compiled = compile(&ms, &ast).expect("compile");

    assert_eq!(ops_named(&compiled, "TS").len(), 1, "one shared scan");
    assert_eq!(ops_named(&compiled, "FS").len(), 2);
    assert_eq!(compiled.ctx.load_file_work.len(), 2);
    let mv = compiled
        .tasks
        .tasks
        .iter()
        .find(|t| matches!(t.work, TaskWork::Move(_)))
        .expect("move task");
    match &mv.work {
        TaskWork::Move(work) => assert_eq!(work.load_file_work.len(), 2),
        _ => unreachable!(),
    }
}
