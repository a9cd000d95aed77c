//! The semantic analyzer: orchestrates phase-1 analysis, metadata
//! binding, operator-tree planning, pruning, and map/reduce task
//! planning for one query.

use std::collections::{BTreeSet, HashSet};

use arrow_schema::DataType;
use indexmap::IndexMap;
use qry_ast::{AstNode, TokenKind};
use qry_common::{CompilerConfig, Datum, ErrorKind, Result};
use qry_functions::{type_name, Registry};
use qry_metastore::{Metastore, Table};
use tracing::{debug, info};

use crate::context::Context;
use crate::join::{gen_join_tree, merge_join_tree};
use crate::mapred::TaskGraph;
use crate::metadata::get_metadata;
use crate::ops::{OpHandle, OperatorArena, OperatorDesc};
use crate::phase1::{do_phase1, init_phase1_ctx};
use crate::plan::descs::{
    ExtractDesc, FileSinkDesc, FilterDesc, ForwardDesc, LimitDesc, ReduceSinkDesc,
    RsPartitioning, ScriptDesc, SelectDesc, TableDesc, TableScanDesc,
};
use crate::plan::exprs::ExprDesc;
use crate::plan::work::{LoadFileDesc, LoadTableDesc};
use crate::pruner::PartitionPruner;
use crate::qb::{Dest, QBExpr, QBExprKind, QB};
use crate::rowres::{ColumnInfo, RowResolver};
use crate::sample::{
    gen_sample_predicate, input_pruning_sufficient, sample_cols_match_bucket_cols, SamplePruner,
};
use crate::typecheck::{gen_expr_desc, get_func_expr_desc};

/// Everything the analyzer produced for one query, kept around for
/// EXPLAIN-style inspection after the task graph is extracted.
#[derive(Debug)]
pub struct ParseContext {
    pub qb: QB,
    pub arena: OperatorArena,
    pub top_ops: IndexMap<String, OpHandle>,
    pub top_sel_ops: IndexMap<String, OpHandle>,
    pub alias_to_pruner: IndexMap<String, PartitionPruner>,
    pub alias_to_sample_pruner: IndexMap<String, SamplePruner>,
    pub load_table_work: Vec<LoadTableDesc>,
    pub load_file_work: Vec<LoadFileDesc>,
}

/// Result of compiling one query: the task dependency graph plus the
/// parse context it was cut from.
#[derive(Debug)]
pub struct CompiledQuery {
    pub tasks: TaskGraph,
    pub ctx: ParseContext,
}

/// One analyzer instance owns all per-query state; it is single-threaded
/// and must not be shared across queries. `analyze` resets state, so an
/// instance can compile queries back to back.
pub struct SemanticAnalyzer<'a> {
    pub(crate) ctx: Context,
    pub(crate) metastore: &'a dyn Metastore,
    pub(crate) registry: &'a Registry,
    pub(crate) arena: OperatorArena,
    pub(crate) alias_to_pruner: IndexMap<String, PartitionPruner>,
    pub(crate) alias_to_sample_pruner: IndexMap<String, SamplePruner>,
    pub(crate) top_ops: IndexMap<String, OpHandle>,
    pub(crate) top_sel_ops: IndexMap<String, OpHandle>,
    pub(crate) load_table_work: Vec<LoadTableDesc>,
    pub(crate) load_file_work: Vec<LoadFileDesc>,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(conf: CompilerConfig, metastore: &'a dyn Metastore, registry: &'a Registry) -> Self {
        SemanticAnalyzer {
            ctx: Context::new(conf),
            metastore,
            registry,
            arena: OperatorArena::new(),
            alias_to_pruner: IndexMap::new(),
            alias_to_sample_pruner: IndexMap::new(),
            top_ops: IndexMap::new(),
            top_sel_ops: IndexMap::new(),
            load_table_work: Vec::new(),
            load_file_work: Vec::new(),
        }
    }

    /// Analyzer with an externally built context (fixed session id).
    pub fn with_context(
        ctx: Context,
        metastore: &'a dyn Metastore,
        registry: &'a Registry,
    ) -> Self {
        SemanticAnalyzer {
            ctx,
            metastore,
            registry,
            arena: OperatorArena::new(),
            alias_to_pruner: IndexMap::new(),
            alias_to_sample_pruner: IndexMap::new(),
            top_ops: IndexMap::new(),
            top_sel_ops: IndexMap::new(),
            load_table_work: Vec::new(),
            load_file_work: Vec::new(),
        }
    }

    /// Clear per-query state between compilations.
    fn reset(&mut self) {
        self.ctx.reset();
        self.arena = OperatorArena::new();
        self.alias_to_pruner.clear();
        self.alias_to_sample_pruner.clear();
        self.top_ops.clear();
        self.top_sel_ops.clear();
        self.load_table_work.clear();
        self.load_file_work.clear();
    }

    /// Compile one query AST into a task graph.
    pub fn analyze(&mut self, ast: &AstNode) -> Result<CompiledQuery> {
        self.reset();

        info!("starting semantic analysis");
        let mut qb = QB::new(None, None, false);
        do_phase1(ast, &mut qb, &mut init_phase1_ctx(), self.registry)?;
        info!("completed phase 1 of semantic analysis");

        get_metadata(&mut qb, self.metastore, &mut self.ctx)?;
        info!("completed metadata binding");

        self.gen_plan(&mut qb)?;
        info!("completed operator plan generation");

        self.gen_partition_pruners(&qb)?;
        self.gen_sample_pruners(&qb);
        info!("completed partition and sample pruning");

        let tasks = self.gen_mapred_tasks(&qb)?;
        info!(tasks = tasks.tasks.len(), "completed task generation");

        Ok(CompiledQuery {
            tasks,
            ctx: ParseContext {
                qb,
                arena: std::mem::take(&mut self.arena),
                top_ops: std::mem::take(&mut self.top_ops),
                top_sel_ops: std::mem::take(&mut self.top_sel_ops),
                alias_to_pruner: std::mem::take(&mut self.alias_to_pruner),
                alias_to_sample_pruner: std::mem::take(&mut self.alias_to_sample_pruner),
                load_table_work: std::mem::take(&mut self.load_table_work),
                load_file_work: std::mem::take(&mut self.load_file_work),
            },
        })
    }

    pub(crate) fn gen_expr(&self, node: &AstNode, rr: &RowResolver) -> Result<ExprDesc> {
        gen_expr_desc(node, rr, self.registry)
    }

    // -------------------------
    // Plan generation
    // -------------------------

    pub(crate) fn gen_plan_qbexpr(&mut self, qbexpr: &mut QBExpr) -> Result<OpHandle> {
        match &mut qbexpr.kind {
            QBExprKind::Query(qb) => self.gen_plan(qb),
            QBExprKind::Union(left, right) => {
                let union_alias = qbexpr.alias.clone();
                let left_alias = left.alias.clone();
                let right_alias = right.alias.clone();
                let left_op = self.gen_plan_qbexpr(left)?;
                let right_op = self.gen_plan_qbexpr(right)?;
                self.gen_union_plan(&union_alias, &left_alias, left_op, &right_alias, right_op)
            }
        }
    }

    /// Build the operator DAG of one query block: table scans and
    /// subquery plans for every source, joins if any, then one body chain
    /// per destination.
    pub(crate) fn gen_plan(&mut self, qb: &mut QB) -> Result<OpHandle> {
        let mut alias_to_op: IndexMap<String, OpHandle> = IndexMap::new();

        let subq_aliases = qb.subq_alias_names();
        for alias in subq_aliases {
            let mut qbexpr_owned = {
                let qbexpr = qb.subq_for_alias_mut(&alias).expect("subquery alias");
                std::mem::replace(
                    qbexpr,
                    QBExpr {
                        alias: alias.clone(),
                        kind: QBExprKind::Query(QB::new(None, None, true)),
                    },
                )
            };
            let op = self.gen_plan_qbexpr(&mut qbexpr_owned)?;
            *qb.subq_for_alias_mut(&alias).expect("subquery alias") = qbexpr_owned;
            alias_to_op.insert(alias, op);
        }

        let tab_aliases: Vec<String> = qb.tab_aliases().map(|a| a.to_string()).collect();
        for alias in tab_aliases {
            let op = self.gen_table_plan(&alias, qb)?;
            alias_to_op.insert(alias, op);
        }

        let src_op = if let Some(join_expr) = qb.parse_info().join_expr().cloned() {
            let tree = gen_join_tree(&join_expr)?;
            qb.set_join_tree(Some(tree));
            merge_join_tree(qb);

            let tree = qb.take_join_tree().expect("merged join tree");
            self.push_join_filters(&tree, &mut alias_to_op)?;
            qb.set_join_tree(Some(tree));
            self.gen_join_plan(qb, &mut alias_to_op)?
        } else {
            *alias_to_op
                .values()
                .next()
                .ok_or_else(|| ErrorKind::Generic.with("query has no source"))?
        };

        let body = self.gen_body_plan(qb, src_op)?;
        debug!(qb = qb.id().unwrap_or("<top>"), "created plan for query block");
        Ok(body)
    }

    /// Table scan (cached per alias) plus the sampling filter when input
    /// pruning cannot implement the sample.
    fn gen_table_plan(&mut self, alias: &str, qb: &mut QB) -> Result<OpHandle> {
        let alias_id = qb.alias_id(alias);
        let tab = qb
            .metadata()
            .table_for_alias(alias)
            .expect("alias bound by metadata pass")
            .clone();

        let mut top = self.top_ops.get(&alias_id).copied();
        if let Some(sel) = self.top_sel_ops.get(&alias_id).copied() {
            top = Some(sel);
        }

        let (top, rr) = match top {
            Some(existing) => {
                self.arena.clear_children(existing);
                (existing, self.arena.row_resolver(existing).clone())
            }
            None => {
                let mut rr = RowResolver::new();
                for field in tab.row_fields() {
                    rr.put(
                        alias,
                        field.name(),
                        ColumnInfo::new(field.name().clone(), field.data_type().clone()),
                    );
                }
                let op = self.arena.make(
                    OperatorDesc::TableScan(TableScanDesc {
                        alias: alias_id.clone(),
                    }),
                    rr.clone(),
                );
                self.top_ops.insert(alias_id.clone(), op);
                (op, rr)
            }
        };

        let mut table_op = top;
        if let Some(sample) = qb.parse_info().table_sample(alias).cloned() {
            let bucket_cols = tab.bucket_cols.clone();
            if bucket_cols.is_empty() && sample.exprs.is_empty() {
                return Err(ErrorKind::NonBucketedTable.with(tab.name.clone()));
            }
            let cols_equal = sample_cols_match_bucket_cols(&sample, &bucket_cols)?;
            let input_pruning = sample.exprs.is_empty() || cols_equal;
            if let Some(ts) = qb.parse_info_mut().table_sample_mut(alias) {
                ts.input_pruning = input_pruning;
            }

            if input_pruning_sufficient(&sample, cols_equal, tab.num_buckets) {
                debug!(alias, "sample satisfied by input pruning");
            } else {
                debug!(alias, "sample needs a filter predicate");
                let predicate = gen_sample_predicate(
                    &sample,
                    &bucket_cols,
                    cols_equal,
                    alias,
                    &rr,
                    self.registry,
                )?;
                table_op = self.arena.make_child(
                    OperatorDesc::Filter(FilterDesc { predicate }),
                    rr.clone(),
                    top,
                );
            }
        }

        debug!(alias = %alias_id, "created table plan");
        Ok(table_op)
    }

    /// One operator chain per destination: filter, aggregation, select,
    /// script, re-sort, limit, sink.
    fn gen_body_plan(&mut self, qb: &mut QB, input: OpHandle) -> Result<OpHandle> {
        let dests: BTreeSet<String> = qb
            .parse_info()
            .clause_names()
            .map(|s| s.to_string())
            .collect();

        let mut curr = input;
        for dest in dests {
            curr = input;

            if qb.parse_info().where_expr(&dest).is_some() {
                curr = self.gen_filter_plan(&dest, qb, curr)?;
            }

            let has_aggregation = qb
                .parse_info()
                .aggregations(&dest)
                .map(|a| !a.is_empty())
                .unwrap_or(false)
                || !crate::groupby::group_by_exprs(qb.parse_info(), &dest).is_empty();
            if has_aggregation {
                curr = if self.ctx.conf.map_side_aggregate {
                    self.gen_groupby_plan_4mr(&dest, qb.parse_info(), curr)?
                } else {
                    self.gen_groupby_plan_2mr(&dest, qb.parse_info(), curr)?
                };
            }

            curr = self.gen_select_plan(&dest, qb, curr)?;
            let limit = qb.parse_info().limit(&dest);

            if qb.parse_info().cluster_by(&dest).is_some()
                || qb.parse_info().distribute_by(&dest).is_some()
                || qb.parse_info().sort_by(&dest).is_some()
            {
                curr = self.gen_reduce_sink_plan(&dest, qb, curr, None)?;
            }

            if qb.parse_info().is_subquery() {
                if let Some(limit) = limit {
                    curr = self.gen_limit_mapred_plan(&dest, qb, curr, limit, false)?;
                }
            } else {
                if let Some(limit) = limit {
                    // the exact cap on an outermost query is applied by
                    // the fetch step
                    let is_outer = qb.is_query();
                    curr = self.gen_limit_mapred_plan(&dest, qb, curr, limit, is_outer)?;
                    qb.parse_info_mut().set_outer_query_limit(limit);
                }
                curr = self.gen_file_sink_plan(&dest, qb, curr)?;
            }

            // expose the block's output under its outer alias
            if let Some(alias) = qb.parse_info().alias().map(|a| a.to_string()) {
                let rr = self.arena.row_resolver(curr).clone();
                let mut renamed = RowResolver::new();
                for info in rr.column_infos() {
                    let col = rr
                        .reverse_lookup(&info.internal_name)
                        .map(|(_, c)| c.to_string())
                        .unwrap_or_else(|| info.internal_name.clone());
                    renamed.put(&alias, &col, info);
                }
                self.arena.set_row_resolver(curr, renamed);
            }
        }

        debug!(qb = qb.id().unwrap_or("<top>"), "created body plan");
        Ok(curr)
    }

    fn gen_filter_plan(&mut self, dest: &str, qb: &QB, input: OpHandle) -> Result<OpHandle> {
        let where_expr = qb
            .parse_info()
            .where_expr(dest)
            .expect("where clause present")
            .clone();
        self.gen_filter_for_cond(where_expr.expect_child(0)?, input)
    }

    pub(crate) fn gen_filter_for_cond(
        &mut self,
        cond: &AstNode,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let rr = self.arena.row_resolver(input).clone();
        let predicate = self.gen_expr(cond, &rr)?;
        Ok(self
            .arena
            .make_child(OperatorDesc::Filter(FilterDesc { predicate }), rr, input))
    }

    /// Column alias of a select item: the explicit `AS`, the trailing
    /// identifier of a column path, or a positional `_C<n>` default.
    fn col_alias(sel_expr: &AstNode, default: String) -> (Option<String>, String) {
        if sel_expr.child_count() == 2 {
            let alias = sel_expr.children()[1].text().to_string();
            return (None, alias);
        }
        let mut root = match sel_expr.child(0) {
            Some(r) => r,
            None => return (None, default),
        };
        let mut tab_alias = None;
        if root.kind() == TokenKind::ColRef && root.child_count() > 1 {
            tab_alias = root.child(0).map(|t| t.text().to_string());
        }
        loop {
            match root.kind() {
                TokenKind::ColRef if root.child_count() == 1 => {
                    root = match root.child(0) {
                        Some(c) => c,
                        None => break,
                    };
                }
                TokenKind::ColRef | TokenKind::Dot => {
                    root = match root.child(root.child_count().saturating_sub(1)) {
                        Some(c) => c,
                        None => break,
                    };
                }
                _ => break,
            }
        }
        let col_alias = if root.kind() == TokenKind::Identifier {
            root.text().to_string()
        } else {
            default
        };
        (tab_alias, col_alias)
    }

    /// Expand `*` / `tab.*` into the input columns.
    fn gen_col_list(
        &self,
        tab_alias: Option<&str>,
        sel: &AstNode,
        col_list: &mut Vec<ExprDesc>,
        input_rr: &RowResolver,
        pos: &mut usize,
        output_rr: &mut RowResolver,
    ) -> Result<()> {
        if let Some(tab) = tab_alias {
            if !input_rr.has_table_alias(tab) {
                return Err(sel.error(ErrorKind::InvalidTableAlias));
            }
        }
        for info in input_rr.column_infos() {
            let (alias, col) = match input_rr.reverse_lookup(&info.internal_name) {
                Some((a, c)) => (a.to_string(), c.to_string()),
                None => continue,
            };
            if let Some(tab) = tab_alias {
                if !alias.eq_ignore_ascii_case(tab) {
                    continue;
                }
            }
            col_list.push(ExprDesc::column(
                info.data_type.clone(),
                info.internal_name.clone(),
            ));
            output_rr.put(
                &alias,
                &col,
                ColumnInfo::new(pos.to_string(), info.data_type.clone()),
            );
            *pos += 1;
        }
        Ok(())
    }

    fn gen_select_plan(&mut self, dest: &str, qb: &QB, input: OpHandle) -> Result<OpHandle> {
        let sel_expr_list = qb
            .parse_info()
            .sel_expr(dest)
            .expect("select clause present")
            .clone();
        let input_rr = self.arena.row_resolver(input).clone();
        let alias = qb.parse_info().alias().map(|a| a.to_string());

        let mut col_list: Vec<ExprDesc> = Vec::new();
        let mut output_rr = RowResolver::new();
        let mut transform: Option<AstNode> = None;
        let mut pos = 0usize;
        let mut select_star = false;

        for (i, item) in sel_expr_list.children().iter().enumerate() {
            let (mut tab_alias, col_alias) = Self::col_alias(item, format!("_C{i}"));
            let sel = item.expect_child(0)?;

            match sel.kind() {
                TokenKind::AllColRef => {
                    tab_alias = sel.child(0).map(|t| t.text().to_lowercase());
                    self.gen_col_list(
                        tab_alias.as_deref(),
                        sel,
                        &mut col_list,
                        &input_rr,
                        &mut pos,
                        &mut output_rr,
                    )?;
                    select_star = true;
                }
                TokenKind::Transform => {
                    if i > 0 {
                        return Err(sel.error(ErrorKind::InvalidTransform));
                    }
                    transform = Some(sel.clone());
                    let cols = sel.expect_child(0)?;
                    for expr in cols.children() {
                        if expr.kind() == TokenKind::AllColRef {
                            let t = expr.child(0).map(|t| t.text().to_lowercase());
                            self.gen_col_list(
                                t.as_deref(),
                                expr,
                                &mut col_list,
                                &input_rr,
                                &mut pos,
                                &mut output_rr,
                            )?;
                            select_star = true;
                        } else {
                            let desc = self.gen_expr(expr, &input_rr)?;
                            output_rr.put(
                                tab_alias.as_deref().unwrap_or(""),
                                expr.text(),
                                ColumnInfo::new(pos.to_string(), desc.data_type()),
                            );
                            col_list.push(desc);
                            pos += 1;
                        }
                    }
                }
                _ => {
                    let desc = self.gen_expr(sel, &input_rr)?;
                    if alias.is_some() && contains_col(&output_rr, &col_alias) {
                        return Err(sel.error(ErrorKind::AmbiguousColumn));
                    }
                    output_rr.put(
                        tab_alias.as_deref().unwrap_or(""),
                        &col_alias,
                        ColumnInfo::new(pos.to_string(), desc.data_type()),
                    );
                    col_list.push(desc);
                    pos += 1;
                }
            }
        }

        // bare NULL select items become typed string constants
        for item in col_list.iter_mut() {
            if matches!(item, ExprDesc::Null) {
                *item = ExprDesc::constant(DataType::Utf8, Datum::Null);
            }
        }

        let desc = SelectDesc {
            col_list,
            select_star: select_star && sel_expr_list.child_count() == 1,
        };
        let mut output = self
            .arena
            .make_child(OperatorDesc::Select(desc), output_rr, input);

        if let Some(trfm) = transform {
            output = self.gen_script_plan(&trfm, qb, output)?;
        }

        debug!(dest, "created select plan");
        Ok(output)
    }

    /// TRANSFORM: pipe the selected columns through a user script. The
    /// output schema defaults to string `key, value` columns.
    fn gen_script_plan(&mut self, trfm: &AstNode, qb: &QB, input: OpHandle) -> Result<OpHandle> {
        let default_output = trfm.child_count() < 3;
        let mut output_cols: Vec<String> = Vec::new();
        if default_output {
            output_cols.push("key".to_string());
            output_cols.push("value".to_string());
        } else {
            for col in trfm.expect_child(2)?.children() {
                output_cols.push(col.text().to_string());
            }
        }

        let mut output_rr = RowResolver::new();
        for col in &output_cols {
            // script output is always strings
            output_rr.put(
                qb.parse_info().alias().unwrap_or(""),
                col,
                ColumnInfo::new(col.clone(), DataType::Utf8),
            );
        }

        let input_cols = self
            .arena
            .row_resolver(input)
            .column_infos()
            .iter()
            .map(|c| c.internal_name.clone())
            .collect();
        let desc = ScriptDesc {
            cmd: trfm.expect_child(1)?.text().to_string(),
            input_info: TableDesc::tab_text(input_cols),
            output_info: TableDesc::tab_text(output_cols),
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::Script(desc), output_rr, input))
    }

    /// CLUSTER BY / DISTRIBUTE BY / SORT BY: a reduce sink carrying the
    /// full row as value, followed by an extract re-exposing the value
    /// payload positionally.
    fn gen_reduce_sink_plan(
        &mut self,
        dest: &str,
        qb: &QB,
        input: OpHandle,
        num_reducers: Option<usize>,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(input).clone();

        let partition_exprs = qb
            .parse_info()
            .cluster_by(dest)
            .or_else(|| qb.parse_info().distribute_by(dest))
            .cloned();
        let mut partition_cols = Vec::new();
        if let Some(exprs) = &partition_exprs {
            for cl in exprs.children() {
                partition_cols.push(self.gen_expr(cl, &input_rr)?);
            }
        }

        let sort_exprs = qb
            .parse_info()
            .cluster_by(dest)
            .or_else(|| qb.parse_info().sort_by(dest))
            .cloned();
        let mut sort_cols = Vec::new();
        let mut order = String::new();
        if let Some(exprs) = &sort_exprs {
            for cl in exprs.children() {
                let expr = match cl.kind() {
                    TokenKind::SortColNameAsc => {
                        order.push('+');
                        cl.expect_child(0)?
                    }
                    TokenKind::SortColNameDesc => {
                        order.push('-');
                        cl.expect_child(0)?
                    }
                    _ => {
                        order.push('+');
                        cl
                    }
                };
                sort_cols.push(self.gen_expr(expr, &input_rr)?);
            }
        }

        let value_cols: Vec<ExprDesc> = input_rr
            .column_infos()
            .iter()
            .map(|info| ExprDesc::column(info.data_type.clone(), info.internal_name.clone()))
            .collect();

        let key_types = sort_cols.iter().map(|k| k.data_type()).collect();
        let rs_desc = ReduceSinkDesc {
            key_cols: sort_cols,
            value_cols,
            tag: -1,
            partitioning: RsPartitioning::Cols(partition_cols),
            order,
            num_reducers,
            key_types,
        };
        let interim = self.arena.make_child(
            OperatorDesc::ReduceSink(rs_desc),
            input_rr.clone(),
            input,
        );

        let mut output_rr = RowResolver::new();
        for (pos, info) in input_rr.column_infos().into_iter().enumerate() {
            let (alias, col) = input_rr
                .reverse_lookup(&info.internal_name)
                .map(|(a, c)| (a.to_string(), c.to_string()))
                .unwrap_or_else(|| (String::new(), info.internal_name.clone()));
            output_rr.put(
                &alias,
                &col,
                ColumnInfo::new(pos.to_string(), info.data_type.clone()),
            );
        }
        let extract = ExtractDesc {
            col: ExprDesc::column(DataType::Utf8, "VALUE"),
        };
        let output = self
            .arena
            .make_child(OperatorDesc::Extract(extract), output_rr, interim);

        debug!(dest, "created reduce-sink plan");
        Ok(output)
    }

    fn gen_limit_plan(&mut self, input: OpHandle, limit: usize) -> Result<OpHandle> {
        let rr = self.arena.row_resolver(input).clone();
        Ok(self
            .arena
            .make_child(OperatorDesc::Limit(LimitDesc { limit }), rr, input))
    }

    /// LIMIT: a local cap, and for non-outermost queries a single-reducer
    /// shuffle followed by a second cap so the limit holds globally.
    fn gen_limit_mapred_plan(
        &mut self,
        dest: &str,
        qb: &QB,
        input: OpHandle,
        limit: usize,
        is_outer_query: bool,
    ) -> Result<OpHandle> {
        let curr = self.gen_limit_plan(input, limit)?;
        if is_outer_query {
            return Ok(curr);
        }
        let curr = self.gen_reduce_sink_plan(dest, qb, curr, Some(1))?;
        self.gen_limit_plan(curr, limit)
    }

    /// Conversion select: cast produced columns to the destination
    /// table's declared column types when they differ.
    fn gen_conversion_select(
        &mut self,
        dest: &str,
        qb: &QB,
        input: OpHandle,
        table: &Table,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(input).clone();
        let row_fields = input_rr.column_infos();
        let table_fields = table.schema.fields();
        if table_fields.len() != row_fields.len() {
            let target = qb.parse_info().dest(dest).expect("destination node");
            return Err(target.error(ErrorKind::TargetTableColumnMismatch).detail(
                format!(
                    "table has {} columns but query produces {}",
                    table_fields.len(),
                    row_fields.len()
                ),
            ));
        }

        let mut converted = false;
        let mut expressions = Vec::with_capacity(row_fields.len());
        for (i, (field, info)) in table_fields.iter().zip(row_fields.iter()).enumerate() {
            let column = ExprDesc::column(info.data_type.clone(), info.internal_name.clone());
            if field.data_type() == &info.data_type {
                expressions.push(column);
                continue;
            }
            converted = true;
            let target_name = type_name(field.data_type()).ok_or_else(|| {
                let target = qb.parse_info().dest(dest).expect("destination node");
                target.error(ErrorKind::TargetTableColumnMismatch).detail(format!(
                    "cannot convert column {i} from {:?} to {:?}",
                    info.data_type,
                    field.data_type()
                ))
            })?;
            expressions.push(get_func_expr_desc(
                self.registry,
                target_name,
                vec![column],
            )?);
        }

        if !converted {
            return Ok(input);
        }

        let mut output_rr = RowResolver::new();
        for (i, expr) in expressions.iter().enumerate() {
            output_rr.put(
                "",
                &i.to_string(),
                ColumnInfo::new(i.to_string(), expr.data_type()),
            );
        }
        Ok(self.arena.make_child(
            OperatorDesc::Select(SelectDesc {
                col_list: expressions,
                select_star: false,
            }),
            output_rr,
            input,
        ))
    }

    /// Terminal file sink writing to a session scratch directory, plus
    /// the load work that moves the result to its destination after the
    /// jobs finish.
    fn gen_file_sink_plan(&mut self, dest: &str, qb: &QB, input: OpHandle) -> Result<OpHandle> {
        let query_tmpdir = self.ctx.make_scratch_path(dest);
        let mut input = input;

        let table_info = match qb
            .metadata()
            .dest(dest)
            .ok_or_else(|| ErrorKind::Generic.with(format!("unbound destination {dest}")))?
            .clone()
        {
            Dest::Table(table) => {
                let table_info = TableDesc::of_table(&table);
                self.load_table_work.push(LoadTableDesc {
                    source_dir: query_tmpdir.clone(),
                    table_info: table_info.clone(),
                    partition_spec: IndexMap::new(),
                });
                input = self.gen_conversion_select(dest, qb, input, &table)?;
                table_info
            }
            Dest::Partition { table, partition } => {
                let table_info = TableDesc::of_table(&table);
                self.load_table_work.push(LoadTableDesc {
                    source_dir: query_tmpdir.clone(),
                    table_info: table_info.clone(),
                    partition_spec: partition.spec.clone(),
                });
                input = self.gen_conversion_select(dest, qb, input, &table)?;
                table_info
            }
            Dest::File { path, is_dfs } => {
                let input_rr = self.arena.row_resolver(input).clone();
                let mut cols: Vec<String> = Vec::new();
                for info in input_rr.column_infos() {
                    let name = match input_rr.reverse_lookup(&info.internal_name) {
                        Some((alias, col)) if alias.is_empty() => col.to_string(),
                        Some((alias, col)) => format!("{alias}.{col}"),
                        None => info.internal_name.clone(),
                    };
                    cols.push(name);
                }
                self.load_file_work.push(LoadFileDesc {
                    source_dir: query_tmpdir.clone(),
                    target_dir: path,
                    is_dfs_dir: is_dfs,
                    columns: cols.join(","),
                });
                TableDesc::text(cols)
            }
        };

        let rr = self.arena.row_resolver(input).clone();
        let desc = FileSinkDesc {
            dir_name: query_tmpdir,
            table_info,
            compressed: self.ctx.conf.compress_result,
        };
        let output = self
            .arena
            .make_child(OperatorDesc::FileSink(desc), rr, input);
        debug!(dest, "created file sink plan");
        Ok(output)
    }

    /// UNION ALL of two sub-plans through a forward operator. Both sides
    /// must expose identical schemas.
    fn gen_union_plan(
        &mut self,
        union_alias: &str,
        left_alias: &str,
        left_op: OpHandle,
        right_alias: &str,
        right_op: OpHandle,
    ) -> Result<OpHandle> {
        let left_rr = self.arena.row_resolver(left_op).clone();
        let right_rr = self.arena.row_resolver(right_op).clone();
        let left_map = left_rr
            .field_map(left_alias)
            .ok_or_else(|| ErrorKind::Generic.with(format!("no fields under {left_alias}")))?;
        let right_map = right_rr
            .field_map(right_alias)
            .ok_or_else(|| ErrorKind::Generic.with(format!("no fields under {right_alias}")))?;

        for (field, l_info) in left_map.iter() {
            let r_info = right_map.get(field).ok_or_else(|| {
                ErrorKind::Generic.with(format!(
                    "schema of both sides of union should match; {right_alias} does not have the field {field}"
                ))
            })?;
            if l_info.internal_name != r_info.internal_name {
                return Err(ErrorKind::Generic.with(format!(
                    "schema of both sides of union should match: {field}:{}:{}",
                    l_info.internal_name, r_info.internal_name
                )));
            }
        }
        for field in right_map.keys() {
            if !left_map.contains_key(field) {
                return Err(ErrorKind::Generic.with(format!(
                    "schema of both sides of union should match; {left_alias} does not have the field {field}"
                )));
            }
        }

        let mut union_rr = RowResolver::new();
        for (field, info) in left_map.iter() {
            union_rr.put(union_alias, field, info.clone());
        }
        Ok(self.arena.make_child_of_all(
            OperatorDesc::Forward(ForwardDesc),
            union_rr,
            &[left_op, right_op],
        ))
    }

    // -------------------------
    // Pruner generation
    // -------------------------

    fn gen_partition_pruners_qbexpr(&mut self, qbexpr: &QBExpr) -> Result<()> {
        match &qbexpr.kind {
            QBExprKind::Query(qb) => self.gen_partition_pruners(qb),
            QBExprKind::Union(left, right) => {
                self.gen_partition_pruners_qbexpr(left)?;
                self.gen_partition_pruners_qbexpr(right)
            }
        }
    }

    /// Build one pruner per table alias from the WHERE clauses and join
    /// filters, and enforce strict pruning.
    ///
    /// Filters are not propagated across subquery boundaries: a predicate
    /// on a subquery's output never reaches the tables inside it.
    pub(crate) fn gen_partition_pruners(&mut self, qb: &QB) -> Result<()> {
        let mut join_pruned: HashSet<String> = HashSet::new();

        for alias in qb.subq_alias_names() {
            let qbexpr = qb.subq_for_alias(&alias).expect("subquery alias");
            self.gen_partition_pruners_qbexpr(qbexpr)?;
        }

        for alias in qb.tab_aliases().map(|a| a.to_string()).collect::<Vec<_>>() {
            let alias_id = qb.alias_id(&alias);
            let table = qb
                .metadata()
                .table_for_alias(&alias)
                .expect("alias bound")
                .clone();
            let mut pruner = PartitionPruner::new(alias.clone(), table);
            for clause in qb.parse_info().clause_names() {
                if let Some(whexp) = qb.parse_info().where_expr(clause) {
                    pruner.add_expression(whexp.expect_child(0)?);
                }
            }
            self.alias_to_pruner.insert(alias_id, pruner);
        }

        if qb.num_tab_aliases() > 0 {
            if let Some(tree) = qb.join_tree() {
                for (pos, src) in tree.base_src.iter().enumerate() {
                    let alias = match src {
                        Some(a) => a,
                        None => continue,
                    };
                    let alias_id = qb.alias_id(alias);
                    let pruner = match self.alias_to_pruner.get_mut(&alias_id) {
                        Some(p) => p,
                        // a subquery input has no pruner of its own
                        None => continue,
                    };
                    for cond in &tree.filters[pos] {
                        pruner.add_join_expression(cond);
                        if pruner.has_partition_predicate(cond) {
                            join_pruned.insert(alias_id.clone());
                        }
                    }
                    if tree.join_src.is_some() {
                        for cond in &tree.filters[0] {
                            pruner.add_join_expression(cond);
                            if pruner.has_partition_predicate(cond) {
                                join_pruned.insert(alias_id.clone());
                            }
                        }
                    }
                }
            }
        }

        if self.ctx.conf.partition_pruning.is_strict() {
            for alias in qb.tab_aliases() {
                let alias_id = qb.alias_id(alias);
                if join_pruned.contains(&alias_id) {
                    continue;
                }
                let pruner = self
                    .alias_to_pruner
                    .get(&alias_id)
                    .expect("pruner built above");
                if !pruner.table().is_partitioned() {
                    continue;
                }
                for clause in qb.parse_info().clause_names() {
                    let whexp = qb.parse_info().where_expr(clause);
                    let constrained = match whexp {
                        Some(w) => pruner.has_partition_predicate(w.expect_child(0)?),
                        None => false,
                    };
                    if !constrained {
                        let at = whexp.or_else(|| qb.parse_info().sel_expr(clause));
                        let err = match at {
                            Some(node) => node.error(ErrorKind::NoPartitionPredicate),
                            None => ErrorKind::NoPartitionPredicate.error(),
                        };
                        return Err(err.detail(format!(
                            "for alias {alias} table {}",
                            pruner.table().name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn gen_sample_pruners_qbexpr(&mut self, qbexpr: &QBExpr) {
        match &qbexpr.kind {
            QBExprKind::Query(qb) => self.gen_sample_pruners(qb),
            QBExprKind::Union(left, right) => {
                self.gen_sample_pruners_qbexpr(left);
                self.gen_sample_pruners_qbexpr(right);
            }
        }
    }

    pub(crate) fn gen_sample_pruners(&mut self, qb: &QB) {
        for alias in qb.subq_alias_names() {
            let qbexpr = qb.subq_for_alias(&alias).expect("subquery alias");
            self.gen_sample_pruners_qbexpr(qbexpr);
        }
        for alias in qb.tab_aliases().map(|a| a.to_string()).collect::<Vec<_>>() {
            if let Some(sample) = qb.parse_info().table_sample(&alias) {
                let alias_id = qb.alias_id(&alias);
                self.alias_to_sample_pruner
                    .insert(alias_id, SamplePruner::new(alias, sample.clone()));
            }
        }
    }
}

/// Whether a column alias is already exposed under any table alias of the
/// resolver.
fn contains_col(rr: &RowResolver, col: &str) -> bool {
    match rr.get_unqualified(col) {
        Ok(found) => found.is_some(),
        // ambiguous means present more than once
        Err(_) => true,
    }
}
