//! Shared configuration, error taxonomy, and value types for Quarry crates.
//!
//! Architecture role:
//! - defines the compiler/session configuration passed across phases
//! - provides the common [`SemanticError`] / [`Result`] contracts
//! - hosts the runtime [`Datum`] value used by constants, partition specs
//!   and aggregation keys
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`datum`]
//! - [`ids`]

/// Compiler/session configuration types.
pub mod config;
/// Runtime value type.
pub mod datum;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;

pub use config::{CompilerConfig, PruningMode};
pub use datum::Datum;
pub use error::{ErrorKind, Result, SemanticError, SourcePos};
pub use ids::{SessionId, TaskId};
