//! Operator descriptors: the typed configuration attached to each node of
//! the physical operator DAG.

use indexmap::IndexMap;
use qry_functions::UdafDescriptor;
use qry_metastore::{Table, TEXT_FIELD_DELIM};
use serde::{Deserialize, Serialize};

use crate::plan::exprs::ExprDesc;

/// Aggregation mode: which phase of a distributed aggregation an operator
/// implements. Determines the evaluator method pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupByMode {
    /// Single-stage aggregation: `iterate` + `terminate`.
    Complete,
    /// First stage over raw rows: `iterate` + `terminatePartial`.
    Partial1,
    /// Intermediate merge stage: `merge` + `terminatePartial`.
    Partial2,
    /// Final merge: `merge` + `terminate`.
    Final,
    /// Map-side hash aggregation: `iterate` + `terminatePartial`.
    Hash,
}

/// One aggregation inside a group-by: the resolved evaluator, its coerced
/// parameters, and the DISTINCT flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationDesc {
    pub evaluator: UdafDescriptor,
    pub parameters: Vec<ExprDesc>,
    pub distinct: bool,
}

/// Table scan; the root of every map-side operator chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableScanDesc {
    /// Qualified alias this scan reads (`<qb id>:<alias>` for nested QBs).
    pub alias: String,
}

/// Row filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDesc {
    pub predicate: ExprDesc,
}

/// Projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectDesc {
    pub col_list: Vec<ExprDesc>,
    /// True when the clause was a plain `*` projection.
    pub select_star: bool,
}

/// Group-by: mode, keys, aggregations, and the per-aggregation method
/// names the runtime dispatches to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupByDesc {
    pub mode: GroupByMode,
    pub keys: Vec<ExprDesc>,
    pub aggregators: Vec<AggregationDesc>,
    /// Evaluation method per aggregator (`terminate` / `terminatePartial`).
    pub eval_methods: Vec<String>,
    /// Aggregation method per aggregator (`iterate` / `merge`).
    pub agg_methods: Vec<String>,
}

/// How a reduce sink routes rows to reducers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RsPartitioning {
    /// Spray rows randomly; used to spread skew when grouping without a
    /// distinct aggregate.
    Random,
    /// Partition on the first `n` key columns.
    KeyPrefix(usize),
    /// Partition on explicit expressions (cluster by / distribute by).
    Cols(Vec<ExprDesc>),
}

/// Shuffle boundary: defines the map-output key/value schema, the sort
/// order, and the routing of rows to reducers. Always the last operator
/// of a map stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceSinkDesc {
    pub key_cols: Vec<ExprDesc>,
    pub value_cols: Vec<ExprDesc>,
    /// Input-side tag for multi-input reducers (joins); -1 when untagged.
    pub tag: i32,
    pub partitioning: RsPartitioning,
    /// One `+`/`-` per sort key; empty means ascending on all keys.
    pub order: String,
    /// Requested reducer count; `None` leaves it to the execution engine.
    pub num_reducers: Option<usize>,
    /// Serialization schema of the key columns; re-issued when join-key
    /// unification rewrites the keys.
    pub key_types: Vec<arrow_schema::DataType>,
}

impl ReduceSinkDesc {
    /// Sort order string, defaulting to ascending per key.
    pub fn effective_order(&self) -> String {
        if self.order.is_empty() {
            "+".repeat(self.key_cols.len())
        } else {
            self.order.clone()
        }
    }
}

/// Join kind of one condition edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

/// One join edge between two input positions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JoinCondDesc {
    pub left: usize,
    pub right: usize,
    pub join_type: JoinType,
}

/// Multi-way join reading tagged reduce-sink inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinDesc {
    /// Per-tag list of value expressions the join emits for that input.
    pub exprs: IndexMap<u8, Vec<ExprDesc>>,
    pub conds: Vec<JoinCondDesc>,
}

/// Row-format contract of a sink or script edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDesc {
    /// Source/target table name when derived from one.
    pub table_name: Option<String>,
    pub input_format: String,
    pub output_format: String,
    /// Field delimiter of the serialized rows.
    pub field_delim: char,
    /// Column names, comma-joined downstream.
    pub columns: Vec<String>,
}

impl TableDesc {
    /// Row format of a metastore table.
    pub fn of_table(table: &Table) -> Self {
        TableDesc {
            table_name: Some(table.name.clone()),
            input_format: table.input_format.clone(),
            output_format: table.output_format.clone(),
            field_delim: TEXT_FIELD_DELIM,
            columns: table
                .schema
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect(),
        }
    }

    /// Default text row format over the given columns.
    pub fn text(columns: Vec<String>) -> Self {
        TableDesc {
            table_name: None,
            input_format: "text".to_string(),
            output_format: "text".to_string(),
            field_delim: TEXT_FIELD_DELIM,
            columns,
        }
    }

    /// Tab-delimited text row format, used on script edges.
    pub fn tab_text(columns: Vec<String>) -> Self {
        TableDesc {
            field_delim: '\t',
            ..Self::text(columns)
        }
    }
}

/// Terminal write of an operator chain into a scratch directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSinkDesc {
    pub dir_name: String,
    pub table_info: TableDesc,
    pub compressed: bool,
}

/// Row-count cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitDesc {
    pub limit: usize,
}

/// Pass-through fan-in; merges UNION ALL branches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardDesc;

/// User script (TRANSFORM) edge: rows are serialized to the command's
/// stdin and its stdout is parsed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDesc {
    pub cmd: String,
    pub input_info: TableDesc,
    pub output_info: TableDesc,
}

/// Reducer-side re-exposure of the shuffle value payload as positional
/// columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractDesc {
    pub col: ExprDesc,
}
