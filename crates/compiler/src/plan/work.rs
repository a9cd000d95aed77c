//! Work units attached to tasks: map/reduce job plans, post-job moves,
//! and direct fetches.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ops::OpHandle;
use crate::plan::descs::TableDesc;

/// Move one produced directory into a destination table or partition
/// after the jobs that wrote it finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTableDesc {
    pub source_dir: String,
    pub table_info: TableDesc,
    /// Partition values when the destination is a single partition.
    pub partition_spec: IndexMap<String, String>,
}

/// Move one produced directory to a final file destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFileDesc {
    pub source_dir: String,
    pub target_dir: String,
    /// DFS target; false for a local filesystem destination.
    pub is_dfs_dir: bool,
    /// Comma-joined column names of the result rows.
    pub columns: String,
}

/// The global move step materializing every destination of the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveWork {
    pub load_table_work: Vec<LoadTableDesc>,
    pub load_file_work: Vec<LoadFileDesc>,
}

/// One partition an input path belongs to, for the map-side input spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDesc {
    pub partition_spec: IndexMap<String, String>,
    pub table_info: TableDesc,
}

/// One map/reduce job: input paths per alias, the map-side operator chain
/// per alias, and an optional reducer chain fed by the reduce sinks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapRedWork {
    /// Input path to the aliases scanned from it.
    pub path_to_aliases: IndexMap<String, Vec<String>>,
    /// Input path to its partition description.
    pub path_to_partition_info: IndexMap<String, PartitionDesc>,
    /// Alias to the root of its map-side operator chain.
    pub alias_to_work: IndexMap<String, OpHandle>,
    /// Root of the reduce-side chain; map-only job when absent.
    pub reducer: Option<OpHandle>,
    /// Requested reducer count; `None` leaves it to the execution engine.
    pub num_reduce_tasks: Option<usize>,
}

/// Read-only plan streaming files directly, bypassing map/reduce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchWork {
    pub source_paths: Vec<String>,
    /// Per-path partition info for partitioned sources.
    pub partition_info: Vec<PartitionDesc>,
    pub table_info: TableDesc,
    pub limit: Option<usize>,
}
