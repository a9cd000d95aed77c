//! Quarry query compiler core.
//!
//! Architecture role:
//! - phase-1 analysis of a parsed AST into query blocks
//! - metadata binding against the metastore collaborator
//! - expression compilation with implicit coercion
//! - operator-tree planning (joins, the four group-by strategies,
//!   partition and sample pruning)
//! - cutting the operator DAG at reduce-sink boundaries into a task
//!   dependency graph, with a fetch fast path for trivial queries
//!
//! Key modules:
//! - [`analyzer`] — the [`analyzer::SemanticAnalyzer`] driver
//! - [`qb`] — query block model
//! - [`phase1`] / [`metadata`] / [`typecheck`]
//! - [`join`] / [`groupby`] / [`pruner`] / [`sample`]
//! - [`ops`] / [`plan`] — operator arena and descriptors
//! - [`mapred`] — map/reduce task planning
//! - [`hashagg`] — map-side hash aggregation memory model
//! - [`explain`]

pub mod analyzer;
pub mod context;
pub mod explain;
pub mod groupby;
pub mod hashagg;
pub mod join;
pub mod mapred;
pub mod metadata;
pub mod ops;
pub mod phase1;
pub mod plan;
pub mod pruner;
pub mod qb;
pub mod rowres;
pub mod rules;
pub mod sample;
pub mod typecheck;

pub use analyzer::{CompiledQuery, ParseContext, SemanticAnalyzer};
pub use context::Context;
pub use explain::{explain_operator_tree, explain_tasks};
pub use mapred::{Task, TaskGraph, TaskWork};
pub use ops::{OpHandle, OperatorArena, OperatorDesc};
pub use rowres::{ColumnInfo, RowResolver};
