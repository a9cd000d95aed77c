//! End-to-end compilation scenarios: AST in, task graph out, plan shapes
//! asserted against an in-memory metastore.

use arrow_schema::{DataType, Field};
use qry_ast::{build, AstNode, TokenKind};
use qry_common::{CompilerConfig, ErrorKind, PruningMode, SessionId};
use qry_compiler::plan::descs::{GroupByMode, RsPartitioning};
use qry_compiler::{CompiledQuery, Context, OpHandle, OperatorDesc, SemanticAnalyzer, TaskWork};
use qry_functions::Registry;
use qry_metastore::{MemMetastore, Partition, Table};

fn base_metastore() -> MemMetastore {
    let mut ms = MemMetastore::new();
    ms.register_table(
        Table::new(
            "src",
            vec![
                Field::new("key", DataType::Utf8, true),
                Field::new("value", DataType::Int32, true),
            ],
            "/warehouse/src",
        )
        .with_files(vec!["part-00000"]),
    );
    ms.register_table(
        Table::new(
            "srcpart",
            vec![
                Field::new("key", DataType::Utf8, true),
                Field::new("value", DataType::Int32, true),
            ],
            "/warehouse/srcpart",
        )
        .partitioned_by(vec!["ds"]),
    );
    for ds in ["2009-01-01", "2009-01-02"] {
        ms.add_partition(
            "srcpart",
            Partition::new(
                vec![("ds", ds)],
                format!("/warehouse/srcpart/ds={ds}"),
                vec!["part-00000"],
            ),
        );
    }
    ms
}

fn compile(conf: CompilerConfig, ms: &MemMetastore, ast: &AstNode) -> qry_common::Result<CompiledQuery> {
    let registry = Registry::with_builtins();
    let mut analyzer = SemanticAnalyzer::with_context(
        Context::with_session_id(conf, SessionId(9)),
        ms,
        &registry,
    );
    analyzer.analyze(ast)
}

/// `SELECT <items> FROM <table> [clauses]` into a temporary file.
fn select_query(table: &str, items: Vec<AstNode>, clauses: Vec<AstNode>) -> AstNode {
    build::query(
        build::from(build::tabref(table, None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(false, items),
            clauses,
        )],
    )
}

fn ops_named(compiled: &CompiledQuery, name: &str) -> Vec<OpHandle> {
    compiled
        .ctx
        .arena
        .handles()
        .filter(|h| compiled.ctx.arena.name(*h) == name)
        .collect()
}

fn mapred_task_count(compiled: &CompiledQuery) -> usize {
    compiled.tasks.mapred_tasks().count()
}

#[test]
fn select_star_unpartitioned_is_a_single_fetch() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![build::sel_expr(build::all_col_ref(None), None)],
        vec![],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    assert_eq!(compiled.tasks.tasks.len(), 1);
    let fetch = compiled.tasks.fetch_task.expect("fetch task");
    match &compiled.tasks.task(fetch).work {
        TaskWork::Fetch(work) => {
            assert_eq!(work.source_paths, vec!["/warehouse/src".to_string()]);
        }
        other => panic!("expected fetch, got {other:?}"),
    }
    assert_eq!(mapred_task_count(&compiled), 0);

    let rendered = qry_compiler::explain_tasks(&compiled.tasks, &compiled.ctx.arena);
    assert!(rendered.contains("fetch /warehouse/src"), "{rendered}");
}

#[test]
fn group_by_without_map_aggregation_is_two_jobs() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![
            build::sel_expr(build::col_ref(None, "key"), None),
            build::sel_expr(build::func("count", false, vec![build::number("1")]), None),
        ],
        vec![build::group_by(vec![build::col_ref(None, "key")])],
    );
    let conf = CompilerConfig {
        map_side_aggregate: false,
        ..CompilerConfig::default()
    };
    let compiled = compile(conf, &ms, &ast).expect("compile");

    assert_eq!(mapred_task_count(&compiled), 2);
    assert!(compiled.tasks.fetch_task.is_some());

    // first shuffle sprays randomly, second partitions on the group key
    let sinks = ops_named(&compiled, "RS");
    assert_eq!(sinks.len(), 2);
    let first = match compiled.ctx.arena.desc(sinks[0]) {
        OperatorDesc::ReduceSink(rs) => rs,
        _ => unreachable!(),
    };
    assert_eq!(first.partitioning, RsPartitioning::Random);
    let second = match compiled.ctx.arena.desc(sinks[1]) {
        OperatorDesc::ReduceSink(rs) => rs,
        _ => unreachable!(),
    };
    assert_eq!(second.partitioning, RsPartitioning::KeyPrefix(1));

    let gbys = ops_named(&compiled, "GBY");
    assert_eq!(gbys.len(), 2);
    let modes: Vec<GroupByMode> = gbys
        .iter()
        .map(|h| match compiled.ctx.arena.desc(*h) {
            OperatorDesc::GroupBy(g) => g.mode,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(modes, vec![GroupByMode::Partial1, GroupByMode::Final]);
}

#[test]
fn count_distinct_partitions_on_the_distinct_key() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![build::sel_expr(
            build::func("count", true, vec![build::col_ref(None, "value")]),
            None,
        )],
        vec![],
    );
    let conf = CompilerConfig {
        map_side_aggregate: false,
        ..CompilerConfig::default()
    };
    let compiled = compile(conf, &ms, &ast).expect("compile");

    let sinks = ops_named(&compiled, "RS");
    let first = match compiled.ctx.arena.desc(sinks[0]) {
        OperatorDesc::ReduceSink(rs) => rs,
        _ => unreachable!(),
    };
    // no random spray: the distinct argument is the partition key
    assert_eq!(first.partitioning, RsPartitioning::KeyPrefix(1));
    assert_eq!(first.key_cols.len(), 1);

    let gbys = ops_named(&compiled, "GBY");
    let (partial, fin) = (
        match compiled.ctx.arena.desc(gbys[0]) {
            OperatorDesc::GroupBy(g) => g,
            _ => unreachable!(),
        },
        match compiled.ctx.arena.desc(gbys[1]) {
            OperatorDesc::GroupBy(g) => g,
            _ => unreachable!(),
        },
    );
    assert_eq!(partial.mode, GroupByMode::Partial1);
    assert_eq!(partial.agg_methods, vec!["iterate".to_string()]);
    assert!(partial.aggregators[0].distinct);
    assert_eq!(fin.mode, GroupByMode::Final);
    assert_eq!(fin.agg_methods, vec!["merge".to_string()]);
}

#[test]
fn keyless_count_with_map_aggregation_skips_middle_stages() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![build::sel_expr(
            build::func("count", false, vec![build::number("1")]),
            None,
        )],
        vec![],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    // HASH -> RS(1 reducer) -> FINAL
    let gbys = ops_named(&compiled, "GBY");
    assert_eq!(gbys.len(), 2);
    let modes: Vec<GroupByMode> = gbys
        .iter()
        .map(|h| match compiled.ctx.arena.desc(*h) {
            OperatorDesc::GroupBy(g) => g.mode,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(modes, vec![GroupByMode::Hash, GroupByMode::Final]);

    let sinks = ops_named(&compiled, "RS");
    assert_eq!(sinks.len(), 1);
    match compiled.ctx.arena.desc(sinks[0]) {
        OperatorDesc::ReduceSink(rs) => assert_eq!(rs.num_reducers, Some(1)),
        _ => unreachable!(),
    }
    assert_eq!(mapred_task_count(&compiled), 1);
}

#[test]
fn map_side_aggregation_uses_four_stage_pipeline() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![
            build::sel_expr(build::col_ref(None, "key"), None),
            build::sel_expr(build::func("count", false, vec![build::number("1")]), None),
        ],
        vec![build::group_by(vec![build::col_ref(None, "key")])],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    let gbys = ops_named(&compiled, "GBY");
    let modes: Vec<GroupByMode> = gbys
        .iter()
        .map(|h| match compiled.ctx.arena.desc(*h) {
            OperatorDesc::GroupBy(g) => g.mode,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(
        modes,
        vec![GroupByMode::Hash, GroupByMode::Partial2, GroupByMode::Final]
    );
    assert_eq!(ops_named(&compiled, "RS").len(), 2);
    assert_eq!(mapred_task_count(&compiled), 2);
}

#[test]
fn merged_three_way_join_shares_one_reduce_stage() {
    let mut ms = base_metastore();
    for name in ["a", "b", "c"] {
        ms.register_table(Table::new(
            name,
            vec![
                Field::new("k", DataType::Utf8, true),
                Field::new("x", DataType::Int32, true),
            ],
            format!("/warehouse/{name}"),
        ));
    }
    let eq = |l: &str, r: &str| {
        build::binary(
            TokenKind::Equal,
            build::col_ref(Some(l), "k"),
            build::col_ref(Some(r), "k"),
        )
    };
    let joined = build::join(
        TokenKind::Join,
        build::join(
            TokenKind::Join,
            build::tabref("a", None, None),
            build::tabref("b", None, None),
            eq("a", "b"),
        ),
        build::tabref("c", None, None),
        eq("a", "c"),
    );
    let ast = build::query(
        build::from(joined),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                false,
                vec![
                    build::sel_expr(build::col_ref(Some("a"), "x"), None),
                    build::sel_expr(build::col_ref(Some("b"), "x"), None),
                ],
            ),
            vec![],
        )],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    let joins = ops_named(&compiled, "JOIN");
    assert_eq!(joins.len(), 1, "joins must merge into one operator");
    let join_node = compiled.ctx.arena.node(joins[0]);
    assert_eq!(join_node.parents.len(), 3);

    let mut tags = Vec::new();
    for parent in &join_node.parents {
        match compiled.ctx.arena.desc(*parent) {
            OperatorDesc::ReduceSink(rs) => {
                tags.push(rs.tag);
                assert_eq!(rs.key_cols.len(), 1, "all inputs share key position 0");
            }
            other => panic!("join parent must be a reduce sink, got {other:?}"),
        }
    }
    assert_eq!(tags, vec![0, 1, 2]);

    match compiled.ctx.arena.desc(joins[0]) {
        OperatorDesc::Join(j) => {
            assert_eq!(j.exprs.len(), 3);
            assert_eq!(j.conds.len(), 2);
        }
        _ => unreachable!(),
    }

    // all three scans feed one job
    assert_eq!(mapred_task_count(&compiled), 1);
    let task = compiled.tasks.mapred_tasks().next().expect("join task");
    match &task.work {
        TaskWork::MapRed(work) => assert_eq!(work.alias_to_work.len(), 3),
        _ => unreachable!(),
    }
}

fn bucketed_table(num_buckets: usize) -> Table {
    let files: Vec<String> = (0..num_buckets.max(32))
        .map(|i| format!("part-{i:05}"))
        .collect();
    Table::new(
        "bucketed",
        vec![
            Field::new("userid", DataType::Int32, true),
            Field::new("key", DataType::Utf8, true),
        ],
        "/warehouse/bucketed",
    )
    .clustered_by(vec!["userid"], num_buckets)
    .with_files(files.iter().map(|f| f.as_str()).collect())
}

#[test]
fn matching_bucket_sample_prunes_input_without_predicate() {
    let mut ms = base_metastore();
    ms.register_table(bucketed_table(32));
    let ast = build::query(
        build::from(build::tabref(
            "bucketed",
            Some(build::table_sample(
                3,
                32,
                vec![build::col_ref(None, "userid")],
            )),
            None,
        )),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
            vec![],
        )],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    assert!(ops_named(&compiled, "FIL").is_empty(), "no sample filter");
    let task = compiled.tasks.mapred_tasks().next().expect("map task");
    match &task.work {
        TaskWork::MapRed(work) => {
            let paths: Vec<&String> = work.path_to_aliases.keys().collect();
            assert_eq!(paths.len(), 1);
            assert!(paths[0].ends_with("part-00002"), "bucket 3 is file 2: {paths:?}");
        }
        _ => unreachable!(),
    }
}

#[test]
fn mismatched_bucket_count_emits_sample_predicate() {
    let mut ms = base_metastore();
    ms.register_table(bucketed_table(16));
    let ast = build::query(
        build::from(build::tabref(
            "bucketed",
            Some(build::table_sample(
                3,
                32,
                vec![build::col_ref(None, "userid")],
            )),
            None,
        )),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
            vec![],
        )],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    let filters = ops_named(&compiled, "FIL");
    assert_eq!(filters.len(), 1);
    let rendered = match compiled.ctx.arena.desc(filters[0]) {
        OperatorDesc::Filter(f) => format!("{}", f.predicate),
        _ => unreachable!(),
    };
    assert!(rendered.contains("default_sample_hashfn"), "{rendered}");
    assert!(rendered.contains("32"), "{rendered}");
    assert!(rendered.contains('2'), "{rendered}");
}

#[test]
fn strict_mode_partition_predicate_selects_one_partition() {
    let ms = base_metastore();
    let ast = select_query(
        "srcpart",
        vec![build::sel_expr(build::col_ref(None, "key"), None)],
        vec![build::where_clause(build::binary(
            TokenKind::Equal,
            build::col_ref(None, "ds"),
            build::string("2009-01-01"),
        ))],
    );
    let conf = CompilerConfig {
        partition_pruning: PruningMode::Strict,
        ..CompilerConfig::default()
    };
    let compiled = compile(conf, &ms, &ast).expect("compile");

    let task = compiled.tasks.mapred_tasks().next().expect("map task");
    match &task.work {
        TaskWork::MapRed(work) => {
            let paths: Vec<&String> = work.path_to_aliases.keys().collect();
            assert_eq!(paths, vec!["/warehouse/srcpart/ds=2009-01-01"]);
        }
        _ => unreachable!(),
    }
}

#[test]
fn strict_mode_without_partition_predicate_fails() {
    let ms = base_metastore();
    let ast = select_query(
        "srcpart",
        vec![build::sel_expr(build::col_ref(None, "key"), None)],
        vec![],
    );
    let conf = CompilerConfig {
        partition_pruning: PruningMode::Strict,
        ..CompilerConfig::default()
    };
    let err = compile(conf, &ms, &ast).expect_err("strict must reject");
    assert_eq!(err.kind(), ErrorKind::NoPartitionPredicate);
}

#[test]
fn select_star_over_pruned_partitions_fetches_directly() {
    let ms = base_metastore();
    let ast = select_query(
        "srcpart",
        vec![build::sel_expr(build::all_col_ref(None), None)],
        vec![build::where_clause(build::binary(
            TokenKind::Equal,
            build::col_ref(None, "ds"),
            build::string("2009-01-02"),
        ))],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    assert_eq!(compiled.tasks.tasks.len(), 1);
    match &compiled.tasks.task(compiled.tasks.fetch_task.expect("fetch")).work {
        TaskWork::Fetch(work) => {
            assert_eq!(
                work.source_paths,
                vec!["/warehouse/srcpart/ds=2009-01-02".to_string()]
            );
            assert_eq!(work.partition_info.len(), 1);
        }
        _ => unreachable!(),
    }
}

#[test]
fn select_star_with_data_predicate_runs_a_job() {
    let ms = base_metastore();
    let ast = select_query(
        "srcpart",
        vec![build::sel_expr(build::all_col_ref(None), None)],
        vec![build::where_clause(build::binary(
            TokenKind::Equal,
            build::col_ref(None, "key"),
            build::string("x"),
        ))],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");
    // unknown partitions force the filter through map/reduce
    assert_eq!(mapred_task_count(&compiled), 1);
}

#[test]
fn select_distinct_with_group_by_is_rejected() {
    let ms = base_metastore();
    let ast = build::query(
        build::from(build::tabref("src", None, None)),
        vec![build::insert(
            build::dest_tmp_file(),
            build::select(
                true,
                vec![
                    build::sel_expr(build::col_ref(None, "key"), None),
                    build::sel_expr(build::col_ref(None, "value"), None),
                ],
            ),
            vec![build::group_by(vec![
                build::col_ref(None, "key"),
                build::col_ref(None, "value"),
            ])],
        )],
    );
    let err = compile(CompilerConfig::default(), &ms, &ast).expect_err("reject");
    assert_eq!(err.kind(), ErrorKind::SelectDistinctWithGroupBy);
}

#[test]
fn select_output_columns_are_dense_positions() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![
            build::sel_expr(build::col_ref(None, "key"), None),
            build::sel_expr(build::col_ref(None, "value"), Some("v")),
        ],
        vec![],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");
    let selects = ops_named(&compiled, "SEL");
    let rr = compiled.ctx.arena.row_resolver(selects[0]);
    let names: Vec<String> = rr
        .column_infos()
        .into_iter()
        .map(|c| c.internal_name)
        .collect();
    assert_eq!(names, vec!["0".to_string(), "1".to_string()]);
}

#[test]
fn task_graph_round_trips_through_serde() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![
            build::sel_expr(build::col_ref(None, "key"), None),
            build::sel_expr(build::func("count", false, vec![build::number("1")]), None),
        ],
        vec![build::group_by(vec![build::col_ref(None, "key")])],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");

    let encoded = serde_json::to_string(&compiled.tasks).expect("encode tasks");
    let decoded: qry_compiler::TaskGraph = serde_json::from_str(&encoded).expect("decode tasks");
    assert_eq!(decoded.tasks.len(), compiled.tasks.tasks.len());
    assert_eq!(decoded.fetch_task, compiled.tasks.fetch_task);
}

#[test]
fn reduce_sinks_have_no_children_after_task_cut() {
    let ms = base_metastore();
    let ast = select_query(
        "src",
        vec![
            build::sel_expr(build::col_ref(None, "key"), None),
            build::sel_expr(build::func("count", false, vec![build::number("1")]), None),
        ],
        vec![build::group_by(vec![build::col_ref(None, "key")])],
    );
    let compiled = compile(CompilerConfig::default(), &ms, &ast).expect("compile");
    for rs in ops_named(&compiled, "RS") {
        assert!(
            compiled.ctx.arena.children(rs).is_empty(),
            "reduce sink must terminate its map stage"
        );
    }
}
