//! Plan model: expression descriptors, operator descriptors, and the work
//! units tasks carry.

pub mod descs;
pub mod exprs;
pub mod work;

pub use descs::{
    AggregationDesc, ExtractDesc, FileSinkDesc, FilterDesc, ForwardDesc, GroupByDesc,
    GroupByMode, JoinCondDesc, JoinDesc, JoinType, LimitDesc, ReduceSinkDesc, RsPartitioning,
    ScriptDesc, SelectDesc, TableDesc, TableScanDesc,
};
pub use exprs::ExprDesc;
pub use work::{
    FetchWork, LoadFileDesc, LoadTableDesc, MapRedWork, MoveWork, PartitionDesc,
};
