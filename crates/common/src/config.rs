use serde::{Deserialize, Serialize};

/// Partition pruning strictness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PruningMode {
    /// Queries over partitioned tables must constrain at least one
    /// partition column.
    Strict,
    /// Unconstrained scans of partitioned tables are allowed.
    NonStrict,
}

impl Default for PruningMode {
    fn default() -> Self {
        Self::NonStrict
    }
}

impl PruningMode {
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Compiler/session configuration shared across analysis phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Partition pruning strictness.
    #[serde(default)]
    pub partition_pruning: PruningMode,

    /// Use map-side hash aggregation (the 4-stage group-by shape) instead
    /// of the plain two-job shape.
    #[serde(default = "default_true")]
    pub map_side_aggregate: bool,
    /// Fraction of `max_heap_bytes` available to the map-side hash
    /// aggregation table, in `(0, 1]`.
    #[serde(default = "default_map_aggr_hash_memory")]
    pub map_aggr_hash_memory: f32,
    /// Heap budget the hash capacity estimate is computed against.
    #[serde(default = "default_max_heap_bytes")]
    pub max_heap_bytes: usize,

    /// Compress final result files.
    #[serde(default)]
    pub compress_result: bool,

    /// Root directory for session-scoped intermediate outputs.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

fn default_true() -> bool {
    true
}

fn default_map_aggr_hash_memory() -> f32 {
    0.5
}

fn default_max_heap_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_scratch_dir() -> String {
    "/tmp/qry".to_string()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            partition_pruning: PruningMode::default(),
            map_side_aggregate: true,
            map_aggr_hash_memory: default_map_aggr_hash_memory(),
            max_heap_bytes: default_max_heap_bytes(),
            compress_result: false,
            scratch_dir: default_scratch_dir(),
        }
    }
}
