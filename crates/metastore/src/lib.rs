//! Table/partition metadata model and metastore contract.
//!
//! Architecture role:
//! - the [`Metastore`] trait is the pull-only collaborator the compiler
//!   binds table aliases and destinations against
//! - [`Table`] / [`Partition`] carry schemas, partitioning, bucketing and
//!   data-file layout
//! - [`MemMetastore`] backs tests and embedding hosts
//!
//! Key modules:
//! - [`table`]
//! - [`provider`]

pub mod provider;
pub mod table;

pub use provider::{MemMetastore, Metastore, MetastoreError};
pub use table::{
    bucket_num_from_file, is_known_format, Partition, Table, KNOWN_FORMATS, TEXT_FIELD_DELIM,
};
