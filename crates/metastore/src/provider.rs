use std::collections::HashMap;

use thiserror::Error;

use crate::table::{Partition, Table};

/// Failures surfaced by a metastore implementation.
#[derive(Debug, Error)]
pub enum MetastoreError {
    /// The named table does not exist.
    #[error("invalid table: {0}")]
    InvalidTable(String),
    /// Backend/storage failure while fetching metadata.
    #[error("metastore storage error: {0}")]
    Storage(String),
}

/// Pull-only metadata source the compiler binds against.
///
/// Implementations are expected to be cheap to call repeatedly; the
/// compiler caches results per query block, not across queries.
pub trait Metastore {
    /// Table record by name.
    fn get_table(&self, name: &str) -> Result<Table, MetastoreError>;

    /// All partitions of a table, in metastore order.
    fn list_partitions(&self, table: &Table) -> Result<Vec<Partition>, MetastoreError>;
}

/// In-memory metastore used by tests and embedding hosts.
#[derive(Debug, Default)]
pub struct MemMetastore {
    tables: HashMap<String, Table>,
    partitions: HashMap<String, Vec<Partition>>,
}

impl MemMetastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table.
    pub fn register_table(&mut self, table: Table) {
        self.tables.insert(table.name.to_lowercase(), table);
    }

    /// Append a partition to a registered table.
    pub fn add_partition(&mut self, table: &str, partition: Partition) {
        self.partitions
            .entry(table.to_lowercase())
            .or_default()
            .push(partition);
    }
}

impl Metastore for MemMetastore {
    fn get_table(&self, name: &str) -> Result<Table, MetastoreError> {
        self.tables
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| MetastoreError::InvalidTable(name.to_string()))
    }

    fn list_partitions(&self, table: &Table) -> Result<Vec<Partition>, MetastoreError> {
        Ok(self
            .partitions
            .get(&table.name.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field};

    use super::{MemMetastore, Metastore, MetastoreError};
    use crate::table::{Partition, Table};

    #[test]
    fn missing_table_is_invalid() {
        let ms = MemMetastore::new();
        let err = ms.get_table("nope").expect_err("missing");
        assert!(matches!(err, MetastoreError::InvalidTable(_)));
    }

    #[test]
    fn partitions_round_trip() {
        let mut ms = MemMetastore::new();
        let tab = Table::new(
            "src",
            vec![Field::new("key", DataType::Utf8, true)],
            "/warehouse/src",
        )
        .partitioned_by(vec!["ds"]);
        ms.register_table(tab.clone());
        ms.add_partition(
            "src",
            Partition::new(vec![("ds", "1")], "/warehouse/src/ds=1", vec!["part-00000"]),
        );
        let parts = ms.list_partitions(&tab).expect("list");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].value("ds"), Some("1"));
    }
}
