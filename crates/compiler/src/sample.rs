//! Bucket sampling: input pruning decisions, sampled-path selection, and
//! the sampling hash predicate.

use qry_ast::TokenKind;
use qry_common::{ErrorKind, Result, SemanticError};
use qry_functions::Registry;
use qry_metastore::{Partition, Table};

use crate::plan::exprs::ExprDesc;
use crate::qb::TableSample;
use crate::rowres::RowResolver;
use crate::typecheck::{gen_expr_desc, get_func_expr_desc};

/// Per-alias sample pruner: maps the sampled bucket to concrete input
/// files when input pruning applies, or leaves the partition whole for
/// the predicate to filter.
#[derive(Debug)]
pub struct SamplePruner {
    pub alias: String,
    pub sample: TableSample,
}

impl SamplePruner {
    pub fn new(alias: impl Into<String>, sample: TableSample) -> Self {
        SamplePruner {
            alias: alias.into(),
            sample,
        }
    }

    /// Input paths of one partition under this sample.
    pub fn prune(&self, table: &Table, partition: &Partition) -> Result<Vec<String>> {
        if !self.sample.input_pruning {
            return Ok(vec![partition.location.clone()]);
        }
        partition
            .sample_paths(
                self.sample.numerator,
                self.sample.denominator,
                table.num_buckets,
            )
            .map_err(SemanticError::generic)
    }
}

/// Whether the sample's `ON` expressions are exactly the table's
/// bucketing columns (no expressions means "use the bucketing columns").
///
/// Sample columns must be bare column references; an aliased reference
/// inside the sampling clause is rejected.
pub fn sample_cols_match_bucket_cols(
    sample: &TableSample,
    bucket_cols: &[String],
) -> Result<bool> {
    if sample.exprs.is_empty() {
        return Ok(true);
    }
    if sample.exprs.len() != bucket_cols.len() {
        return Ok(false);
    }
    for expr in &sample.exprs {
        if expr.kind() != TokenKind::ColRef {
            return Ok(false);
        }
        if expr.child_count() != 1 {
            return Err(expr.error(ErrorKind::TableAliasNotAllowed));
        }
        let name = expr.expect_child(0)?.text();
        if !bucket_cols.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether selecting input buckets alone implements the sample: the
/// sample columns are the bucketing columns and the denominator lines up
/// with the bucket count.
pub fn input_pruning_sufficient(
    sample: &TableSample,
    cols_equal: bool,
    num_buckets: usize,
) -> bool {
    let on_bucket_cols = sample.exprs.is_empty() || cols_equal;
    on_bucket_cols
        && (sample.numerator == sample.denominator
            || (sample.denominator <= num_buckets && num_buckets % sample.denominator == 0))
}

/// Build the sampling predicate
/// `((default_sample_hashfn(args) & INT32_MAX) % d) = (n - 1)`,
/// hashing the bucketing columns when they match the sample and the
/// explicit `ON` expressions otherwise.
pub fn gen_sample_predicate(
    sample: &TableSample,
    bucket_cols: &[String],
    use_bucket_cols: bool,
    alias: &str,
    rr: &RowResolver,
    registry: &Registry,
) -> Result<ExprDesc> {
    let numerator = ExprDesc::int32(sample.numerator as i32 - 1);
    let denominator = ExprDesc::int32(sample.denominator as i32);
    let int_max = ExprDesc::int32(i32::MAX);

    let mut args = Vec::new();
    if use_bucket_cols {
        for col in bucket_cols {
            let info = rr
                .get(alias, col)
                .ok_or_else(|| ErrorKind::SampleColumnNotFound.with(col.clone()))?;
            args.push(ExprDesc::column(
                info.data_type.clone(),
                info.internal_name.clone(),
            ));
        }
    } else {
        for expr in &sample.exprs {
            args.push(gen_expr_desc(expr, rr, registry)?);
        }
    }

    let hash = get_func_expr_desc(registry, "default_sample_hashfn", args)?;
    let masked = get_func_expr_desc(registry, "&", vec![hash, int_max])?;
    let modulo = get_func_expr_desc(registry, "%", vec![masked, denominator])?;
    get_func_expr_desc(registry, "=", vec![modulo, numerator])
}
