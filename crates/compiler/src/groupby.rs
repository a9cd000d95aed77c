//! Group-by planning: the four physical aggregation strategies and the
//! reduce-sink/group-by operator pairs they are assembled from.

use qry_ast::{AstNode, TokenKind};
use qry_common::{ErrorKind, Result};
use qry_functions::{
    Registry, UdafDescriptor, ITERATE, MERGE, TERMINATE, TERMINATE_PARTIAL,
};

use crate::analyzer::SemanticAnalyzer;
use crate::ops::{OpHandle, OperatorDesc};
use crate::plan::descs::{
    AggregationDesc, GroupByDesc, GroupByMode, ReduceSinkDesc, RsPartitioning,
};
use crate::plan::exprs::ExprDesc;
use crate::qb::QBParseInfo;
use crate::rowres::{ColumnInfo, RowResolver};
use crate::typecheck::coerce_args;

/// Group-by expressions of a destination. `SELECT DISTINCT a, b` is the
/// same aggregation as `SELECT a, b GROUP BY a, b`, so distinct selects
/// contribute their select expressions here.
pub fn group_by_exprs(parse_info: &QBParseInfo, dest: &str) -> Vec<AstNode> {
    let sel = parse_info.sel_expr(dest);
    if sel.map(|s| s.kind() == TokenKind::SelectDi).unwrap_or(false) {
        sel.map(|s| {
            s.children()
                .iter()
                .filter_map(|item| item.child(0).cloned())
                .collect()
        })
        .unwrap_or_default()
    } else {
        parse_info
            .group_by(dest)
            .map(|g| g.children().to_vec())
            .unwrap_or_default()
    }
}

/// A UDAF bound for one aggregation mode: the evaluator, the method pair,
/// and the parameters coerced to the aggregation method's declared types.
pub struct UdafBinding {
    pub evaluator: UdafDescriptor,
    pub agg_method: String,
    pub eval_method: String,
    pub params: Vec<ExprDesc>,
}

impl UdafBinding {
    /// Output type of this aggregation under its evaluation method.
    pub fn output_type(&self) -> arrow_schema::DataType {
        self.evaluator.method_return(&self.eval_method).clone()
    }
}

/// Resolve a UDAF for `mode` and coerce its parameters.
///
/// The first-stage modes feed raw rows through `iterate`; merge stages
/// combine partials through `merge`. A DISTINCT aggregation keeps using
/// `iterate` until the final stage, where it degenerates to a plain
/// merge.
pub fn resolve_udaf(
    registry: &Registry,
    name: &str,
    mode: GroupByMode,
    distinct: bool,
    params: Vec<ExprDesc>,
    at: &AstNode,
) -> Result<UdafBinding> {
    let param_types: Vec<arrow_schema::DataType> =
        params.iter().map(|p| p.data_type()).collect();
    let evaluator = registry
        .get_udaf_evaluator(name, &param_types)
        .ok_or_else(|| {
            at.error(ErrorKind::InvalidFunctionSignature)
                .detail(format!("aggregation {name}({param_types:?})"))
        })?;

    let mut agg_method = match mode {
        GroupByMode::Partial1 | GroupByMode::Hash | GroupByMode::Complete => ITERATE,
        _ => MERGE,
    };
    if distinct && mode != GroupByMode::Final {
        agg_method = ITERATE;
    }
    let eval_method = match mode {
        GroupByMode::Partial1 | GroupByMode::Hash | GroupByMode::Partial2 => TERMINATE_PARTIAL,
        _ => TERMINATE,
    };

    let params = coerce_args(params, evaluator.method_args(agg_method), registry)?;
    Ok(UdafBinding {
        evaluator,
        agg_method: agg_method.to_string(),
        eval_method: eval_method.to_string(),
        params,
    })
}

impl SemanticAnalyzer<'_> {
    /// First reduce sink of a group-by plan, fed by raw input rows.
    ///
    /// The sort key is the group keys followed by the distinct arguments;
    /// the value is the aggregation arguments. `partition_prefix` routes
    /// by that many leading keys; `None` sprays randomly to spread skew.
    pub(crate) fn gen_groupby_rs_from_input(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
        partition_prefix: Option<usize>,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut reduce_keys: Vec<ExprDesc> = Vec::new();

        for expr in group_by_exprs(parse_info, dest) {
            let text = expr.string_tree();
            if output_rr.get("", &text).is_some() {
                return Err(expr.error(ErrorKind::DuplicateGroupByKey));
            }
            let key = self.gen_expr(&expr, &input_rr)?;
            output_rr.put(
                "",
                &text,
                ColumnInfo::new(format!("KEY.{}", reduce_keys.len()), key.data_type()),
            );
            reduce_keys.push(key);
        }

        if let Some(distinct) = parse_info.distinct_func(dest).cloned() {
            for parameter in distinct.children().iter().skip(1) {
                let text = parameter.string_tree();
                if output_rr.get("", &text).is_none() {
                    let key = self.gen_expr(parameter, &input_rr)?;
                    output_rr.put(
                        "",
                        &text,
                        ColumnInfo::new(format!("KEY.{}", reduce_keys.len()), key.data_type()),
                    );
                    reduce_keys.push(key);
                }
            }
        }

        let mut reduce_values: Vec<ExprDesc> = Vec::new();
        if let Some(aggregations) = parse_info.aggregations(dest).cloned() {
            for tree in aggregations.values() {
                for parameter in tree.children().iter().skip(1) {
                    let text = parameter.string_tree();
                    if output_rr.get("", &text).is_none() {
                        let value = self.gen_expr(parameter, &input_rr)?;
                        output_rr.put(
                            "",
                            &text,
                            ColumnInfo::new(
                                format!("VALUE.{}", reduce_values.len()),
                                value.data_type(),
                            ),
                        );
                        reduce_values.push(value);
                    }
                }
            }
        }

        let partitioning = match partition_prefix {
            Some(n) => RsPartitioning::KeyPrefix(clamp_prefix(n, reduce_keys.len())),
            None => RsPartitioning::Random,
        };
        let key_types = reduce_keys.iter().map(|k| k.data_type()).collect();
        let desc = ReduceSinkDesc {
            key_cols: reduce_keys,
            value_cols: reduce_values,
            tag: -1,
            partitioning,
            order: String::new(),
            num_reducers: None,
            key_types,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::ReduceSink(desc), output_rr, input))
    }

    /// Reducer-side group-by over the first reduce sink (COMPLETE or
    /// PARTIAL1): keys and aggregation arguments resolve to the sink's
    /// `KEY.*`/`VALUE.*` columns by canonical text.
    pub(crate) fn gen_groupby_operator(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
        mode: GroupByMode,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut keys: Vec<ExprDesc> = Vec::new();

        let group_exprs = group_by_exprs(parse_info, dest);
        for (i, expr) in group_exprs.iter().enumerate() {
            let text = expr.string_tree();
            let info = input_rr
                .get("", &text)
                .ok_or_else(|| expr.error(ErrorKind::InvalidColumn))?;
            keys.push(ExprDesc::column(
                info.data_type.clone(),
                info.internal_name.clone(),
            ));
            output_rr.put("", &text, ColumnInfo::new(i.to_string(), info.data_type.clone()));
        }

        let mut aggregations: Vec<AggregationDesc> = Vec::new();
        let mut eval_methods = Vec::new();
        let mut agg_methods = Vec::new();
        if let Some(trees) = parse_info.aggregations(dest).cloned() {
            for tree in trees.values() {
                let name = tree.expect_child(0)?.text().to_lowercase();
                let distinct = tree.kind() == TokenKind::FunctionDi;
                let mut params = Vec::new();
                for parameter in tree.children().iter().skip(1) {
                    let text = parameter.string_tree();
                    let info = input_rr
                        .get("", &text)
                        .ok_or_else(|| parameter.error(ErrorKind::InvalidColumn))?;
                    params.push(ExprDesc::column(
                        info.data_type.clone(),
                        info.internal_name.clone(),
                    ));
                }
                let binding =
                    resolve_udaf(self.registry, &name, mode, distinct, params, tree)?;
                output_rr.put(
                    "",
                    &tree.string_tree(),
                    ColumnInfo::new(
                        (keys.len() + aggregations.len()).to_string(),
                        binding.output_type(),
                    ),
                );
                aggregations.push(AggregationDesc {
                    evaluator: binding.evaluator,
                    parameters: binding.params,
                    distinct,
                });
                eval_methods.push(binding.eval_method);
                agg_methods.push(binding.agg_method);
            }
        }

        let desc = GroupByDesc {
            mode,
            keys,
            aggregators: aggregations,
            eval_methods,
            agg_methods,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::GroupBy(desc), output_rr, input))
    }

    /// Intermediate group-by of the hash plan (PARTIAL2): distinct
    /// aggregations re-read their arguments from the shuffle key, plain
    /// aggregations merge the shuffled partials.
    pub(crate) fn gen_groupby_operator_partial2(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let mode = GroupByMode::Partial2;
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut keys: Vec<ExprDesc> = Vec::new();

        for (i, expr) in group_by_exprs(parse_info, dest).iter().enumerate() {
            let text = expr.string_tree();
            let info = input_rr
                .get("", &text)
                .ok_or_else(|| expr.error(ErrorKind::InvalidColumn))?;
            keys.push(ExprDesc::column(
                info.data_type.clone(),
                info.internal_name.clone(),
            ));
            output_rr.put("", &text, ColumnInfo::new(i.to_string(), info.data_type.clone()));
        }

        let mut aggregations: Vec<AggregationDesc> = Vec::new();
        let mut eval_methods = Vec::new();
        let mut agg_methods = Vec::new();
        if let Some(trees) = parse_info.aggregations(dest).cloned() {
            for (text, tree) in trees.iter() {
                let name = tree.expect_child(0)?.text().to_lowercase();
                let distinct = tree.kind() == TokenKind::FunctionDi;
                let mut params = Vec::new();
                if distinct {
                    for parameter in tree.children().iter().skip(1) {
                        let ptext = parameter.string_tree();
                        let info = input_rr
                            .get("", &ptext)
                            .ok_or_else(|| parameter.error(ErrorKind::InvalidColumn))?;
                        params.push(ExprDesc::column(
                            info.data_type.clone(),
                            info.internal_name.clone(),
                        ));
                    }
                } else {
                    let info = input_rr
                        .get("", text)
                        .ok_or_else(|| tree.error(ErrorKind::InvalidColumn))?;
                    params.push(ExprDesc::column(
                        info.data_type.clone(),
                        info.internal_name.clone(),
                    ));
                }
                let binding =
                    resolve_udaf(self.registry, &name, mode, distinct, params, tree)?;
                output_rr.put(
                    "",
                    text,
                    ColumnInfo::new(
                        (keys.len() + aggregations.len()).to_string(),
                        binding.output_type(),
                    ),
                );
                aggregations.push(AggregationDesc {
                    evaluator: binding.evaluator,
                    parameters: binding.params,
                    distinct,
                });
                eval_methods.push(binding.eval_method);
                agg_methods.push(binding.agg_method);
            }
        }

        let desc = GroupByDesc {
            mode,
            keys,
            aggregators: aggregations,
            eval_methods,
            agg_methods,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::GroupBy(desc), output_rr, input))
    }

    /// Map-side hash group-by (HASH): compiles keys and aggregation
    /// arguments directly against the input rows.
    pub(crate) fn gen_map_groupby_operator(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let mode = GroupByMode::Hash;
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut keys: Vec<ExprDesc> = Vec::new();

        let group_exprs = group_by_exprs(parse_info, dest);
        for (i, expr) in group_exprs.iter().enumerate() {
            let key = self.gen_expr(expr, &input_rr)?;
            output_rr.put(
                "",
                &expr.string_tree(),
                ColumnInfo::new(i.to_string(), key.data_type()),
            );
            keys.push(key);
        }

        if let Some(distinct) = parse_info.distinct_func(dest).cloned() {
            for parameter in distinct.children().iter().skip(1) {
                let text = parameter.string_tree();
                if output_rr.get("", &text).is_none() {
                    let key = self.gen_expr(parameter, &input_rr)?;
                    output_rr.put(
                        "",
                        &text,
                        ColumnInfo::new(keys.len().to_string(), key.data_type()),
                    );
                    keys.push(key);
                }
            }
        }

        let mut aggregations: Vec<AggregationDesc> = Vec::new();
        let mut eval_methods = Vec::new();
        let mut agg_methods = Vec::new();
        if let Some(trees) = parse_info.aggregations(dest).cloned() {
            for tree in trees.values() {
                let name = tree.expect_child(0)?.text().to_lowercase();
                let distinct = tree.kind() == TokenKind::FunctionDi;
                let mut params = Vec::new();
                for parameter in tree.children().iter().skip(1) {
                    params.push(self.gen_expr(parameter, &input_rr)?);
                }
                let binding =
                    resolve_udaf(self.registry, &name, mode, distinct, params, tree)?;
                output_rr.put(
                    "",
                    &tree.string_tree(),
                    ColumnInfo::new(
                        (keys.len() + aggregations.len()).to_string(),
                        binding.output_type(),
                    ),
                );
                aggregations.push(AggregationDesc {
                    evaluator: binding.evaluator,
                    parameters: binding.params,
                    distinct,
                });
                eval_methods.push(binding.eval_method);
                agg_methods.push(binding.agg_method);
            }
        }

        let desc = GroupByDesc {
            mode,
            keys,
            aggregators: aggregations,
            eval_methods,
            agg_methods,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::GroupBy(desc), output_rr, input))
    }

    /// Reduce sink over a map-side group-by: keys and values reference
    /// the group-by's positional output columns.
    pub(crate) fn gen_groupby_rs_after_map_gby(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
        num_reducers: Option<usize>,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut reduce_keys: Vec<ExprDesc> = Vec::new();

        for expr in group_by_exprs(parse_info, dest) {
            let text = expr.string_tree();
            if output_rr.get("", &text).is_none() {
                let info = input_rr
                    .get("", &text)
                    .ok_or_else(|| expr.error(ErrorKind::InvalidColumn))?;
                reduce_keys.push(ExprDesc::column(
                    info.data_type.clone(),
                    info.internal_name.clone(),
                ));
                output_rr.put(
                    "",
                    &text,
                    ColumnInfo::new(
                        format!("KEY.{}", reduce_keys.len() - 1),
                        info.data_type.clone(),
                    ),
                );
            }
        }

        let has_distinct = parse_info.distinct_func(dest).is_some();
        if let Some(distinct) = parse_info.distinct_func(dest).cloned() {
            for parameter in distinct.children().iter().skip(1) {
                let text = parameter.string_tree();
                if output_rr.get("", &text).is_none() {
                    let info = input_rr
                        .get("", &text)
                        .ok_or_else(|| parameter.error(ErrorKind::InvalidColumn))?;
                    reduce_keys.push(ExprDesc::column(
                        info.data_type.clone(),
                        info.internal_name.clone(),
                    ));
                    output_rr.put(
                        "",
                        &text,
                        ColumnInfo::new(
                            format!("KEY.{}", reduce_keys.len() - 1),
                            info.data_type.clone(),
                        ),
                    );
                }
            }
        }

        // partial aggregation results ride in the values, positionally
        // after the keys in the map group-by's output
        let mut reduce_values: Vec<ExprDesc> = Vec::new();
        let input_infos = input_rr.column_infos();
        let mut input_field = reduce_keys.len();
        if let Some(trees) = parse_info.aggregations(dest).cloned() {
            for (text, _tree) in trees.iter() {
                let data_type = input_infos[input_field].data_type.clone();
                reduce_values.push(ExprDesc::column(
                    data_type.clone(),
                    input_field.to_string(),
                ));
                input_field += 1;
                output_rr.put(
                    "",
                    text,
                    ColumnInfo::new(format!("VALUE.{}", reduce_values.len() - 1), data_type),
                );
            }
        }

        let partitioning = if has_distinct {
            RsPartitioning::KeyPrefix(reduce_keys.len())
        } else {
            RsPartitioning::Random
        };
        let key_types = reduce_keys.iter().map(|k| k.data_type()).collect();
        let desc = ReduceSinkDesc {
            key_cols: reduce_keys,
            value_cols: reduce_values,
            tag: -1,
            partitioning,
            order: String::new(),
            num_reducers,
            key_types,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::ReduceSink(desc), output_rr, input))
    }

    /// Second reduce sink of a two-stage plan: group keys by position in
    /// the partial output, partial aggregation results as values.
    pub(crate) fn gen_groupby_rs2(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
        partition_prefix: usize,
    ) -> Result<OpHandle> {
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut reduce_keys: Vec<ExprDesc> = Vec::new();

        let group_exprs = group_by_exprs(parse_info, dest);
        for (i, expr) in group_exprs.iter().enumerate() {
            let text = expr.string_tree();
            let info = input_rr
                .get("", &text)
                .ok_or_else(|| expr.error(ErrorKind::InvalidColumn))?;
            reduce_keys.push(ExprDesc::column(info.data_type.clone(), i.to_string()));
            output_rr.put(
                "",
                &text,
                ColumnInfo::new(format!("KEY.{i}"), info.data_type.clone()),
            );
        }

        let mut reduce_values: Vec<ExprDesc> = Vec::new();
        let mut input_field = reduce_keys.len();
        if let Some(trees) = parse_info.aggregations(dest).cloned() {
            for (text, tree) in trees.iter() {
                let info = input_rr
                    .get("", text)
                    .ok_or_else(|| tree.error(ErrorKind::InvalidColumn))?;
                reduce_values.push(ExprDesc::column(
                    info.data_type.clone(),
                    input_field.to_string(),
                ));
                input_field += 1;
                output_rr.put(
                    "",
                    text,
                    ColumnInfo::new(
                        format!("VALUE.{}", reduce_values.len() - 1),
                        info.data_type.clone(),
                    ),
                );
            }
        }

        let key_types = reduce_keys.iter().map(|k| k.data_type()).collect();
        let desc = ReduceSinkDesc {
            key_cols: reduce_keys,
            value_cols: reduce_values,
            tag: -1,
            partitioning: RsPartitioning::KeyPrefix(partition_prefix),
            order: String::new(),
            num_reducers: None,
            key_types,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::ReduceSink(desc), output_rr, input))
    }

    /// Final group-by merging partial results (FINAL): each aggregation
    /// reads its single partial column.
    pub(crate) fn gen_groupby_operator_final(
        &mut self,
        parse_info: &QBParseInfo,
        dest: &str,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let mode = GroupByMode::Final;
        let input_rr = self.arena.row_resolver(input).clone();
        let mut output_rr = RowResolver::expr_resolver();
        let mut keys: Vec<ExprDesc> = Vec::new();

        for (i, expr) in group_by_exprs(parse_info, dest).iter().enumerate() {
            let text = expr.string_tree();
            let info = input_rr
                .get("", &text)
                .ok_or_else(|| expr.error(ErrorKind::InvalidColumn))?;
            keys.push(ExprDesc::column(
                info.data_type.clone(),
                info.internal_name.clone(),
            ));
            output_rr.put("", &text, ColumnInfo::new(i.to_string(), info.data_type.clone()));
        }

        let mut aggregations: Vec<AggregationDesc> = Vec::new();
        let mut eval_methods = Vec::new();
        let mut agg_methods = Vec::new();
        if let Some(trees) = parse_info.aggregations(dest).cloned() {
            for (text, tree) in trees.iter() {
                let name = tree.expect_child(0)?.text().to_lowercase();
                let info = input_rr
                    .get("", text)
                    .ok_or_else(|| tree.error(ErrorKind::InvalidColumn))?;
                let params = vec![ExprDesc::column(
                    info.data_type.clone(),
                    info.internal_name.clone(),
                )];
                // at the final stage a distinct aggregation is a plain merge
                let binding = resolve_udaf(self.registry, &name, mode, false, params, tree)?;
                output_rr.put(
                    "",
                    text,
                    ColumnInfo::new(
                        (keys.len() + aggregations.len()).to_string(),
                        binding.output_type(),
                    ),
                );
                aggregations.push(AggregationDesc {
                    evaluator: binding.evaluator,
                    parameters: binding.params,
                    distinct: false,
                });
                eval_methods.push(binding.eval_method);
                agg_methods.push(binding.agg_method);
            }
        }

        let desc = GroupByDesc {
            mode,
            keys,
            aggregators: aggregations,
            eval_methods,
            agg_methods,
        };
        Ok(self
            .arena
            .make_child(OperatorDesc::GroupBy(desc), output_rr, input))
    }

    /// Single-job plan: `RS(key = group keys + distinct args) ->
    /// GBY(COMPLETE)`, partitioned on the group keys.
    pub(crate) fn gen_groupby_plan_1mr(
        &mut self,
        dest: &str,
        parse_info: &QBParseInfo,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let num_keys = group_by_exprs(parse_info, dest).len();
        let rs = self.gen_groupby_rs_from_input(parse_info, dest, input, Some(num_keys))?;
        self.gen_groupby_operator(parse_info, dest, rs, GroupByMode::Complete)
    }

    /// Two-job plan: partial aggregation sprayed randomly (or by the
    /// distinct key), then a final merge partitioned on the group keys.
    pub(crate) fn gen_groupby_plan_2mr(
        &mut self,
        dest: &str,
        parse_info: &QBParseInfo,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let has_distinct = parse_info.distinct_func(dest).is_some();
        let num_keys = group_by_exprs(parse_info, dest).len();

        // Without a distinct the rows can go to any reducer, so spray
        // randomly to spread skew; a distinct needs co-location by key.
        let rs = self.gen_groupby_rs_from_input(
            parse_info,
            dest,
            input,
            if has_distinct {
                Some(usize::MAX)
            } else {
                None
            },
        )?;
        let gby = self.gen_groupby_operator(parse_info, dest, rs, GroupByMode::Partial1)?;
        let rs2 = self.gen_groupby_rs2(parse_info, dest, gby, num_keys)?;
        self.gen_groupby_operator_final(parse_info, dest, rs2)
    }

    /// Whether the hash plan can skip its middle stages: no group keys
    /// and no distinct means the map-side partials can go straight to one
    /// reducer.
    fn optimize_map_aggr(&self, parse_info: &QBParseInfo, dest: &str) -> bool {
        group_by_exprs(parse_info, dest).is_empty()
            && parse_info.distinct_func(dest).is_none()
    }

    /// Map-side hash plan: `GBY(HASH)` on the mappers, then either the
    /// full `RS -> GBY(PARTIAL2) -> RS -> GBY(FINAL)` pipeline or, for
    /// keyless non-distinct aggregations, a single-reducer final merge.
    pub(crate) fn gen_groupby_plan_4mr(
        &mut self,
        dest: &str,
        parse_info: &QBParseInfo,
        input: OpHandle,
    ) -> Result<OpHandle> {
        let map_gby = self.gen_map_groupby_operator(parse_info, dest, input)?;

        if self.optimize_map_aggr(parse_info, dest) {
            let rs = self.gen_groupby_rs_after_map_gby(parse_info, dest, map_gby, Some(1))?;
            return self.gen_groupby_operator_final(parse_info, dest, rs);
        }

        let num_keys = group_by_exprs(parse_info, dest).len();
        let rs = self.gen_groupby_rs_after_map_gby(parse_info, dest, map_gby, None)?;
        let partial2 = self.gen_groupby_operator_partial2(parse_info, dest, rs)?;
        let rs2 = self.gen_groupby_rs2(parse_info, dest, partial2, num_keys)?;
        self.gen_groupby_operator_final(parse_info, dest, rs2)
    }
}

/// Fix an over-large partition prefix to the key count; `usize::MAX`
/// stands for "all keys" when the first sink partitions on the distinct
/// key as well.
pub(crate) fn clamp_prefix(prefix: usize, num_keys: usize) -> usize {
    prefix.min(num_keys)
}
