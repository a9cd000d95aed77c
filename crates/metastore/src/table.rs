use std::sync::{Arc, OnceLock};

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::provider::MetastoreError;

/// Storage formats the execution runtime can read and write.
///
/// The metastore records formats by name; anything outside this set is
/// rejected during metadata binding.
pub const KNOWN_FORMATS: &[&str] = &["text", "seqfile"];

/// Field delimiter of the default text format (control-A).
pub const TEXT_FIELD_DELIM: char = '\u{1}';

/// Whether `format` names a readable/writable storage format.
pub fn is_known_format(format: &str) -> bool {
    KNOWN_FORMATS.contains(&format.to_ascii_lowercase().as_str())
}

/// One table as recorded in the metastore: data columns, partitioning,
/// bucketing, and storage formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Data columns (partition columns are not part of this schema).
    pub schema: Schema,
    /// Partition column names; partition values are strings.
    pub partition_cols: Vec<String>,
    /// Clustering columns, empty for non-bucketed tables.
    pub bucket_cols: Vec<String>,
    /// Bucket count; 0 for non-bucketed tables.
    pub num_buckets: usize,
    pub input_format: String,
    pub output_format: String,
    /// Root data directory of the table.
    pub location: String,
    /// Data file names under `location` for unpartitioned tables.
    pub files: Vec<String>,
}

impl Table {
    /// A text-format table with the given data columns.
    pub fn new(name: impl Into<String>, fields: Vec<Field>, location: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            schema: Schema::new(fields),
            partition_cols: Vec::new(),
            bucket_cols: Vec::new(),
            num_buckets: 0,
            input_format: "text".to_string(),
            output_format: "text".to_string(),
            location: location.into(),
            files: Vec::new(),
        }
    }

    /// Record the table's data files (unpartitioned tables).
    pub fn with_files(mut self, files: Vec<&str>) -> Self {
        self.files = files.into_iter().map(|f| f.to_string()).collect();
        self
    }

    /// View an unpartitioned table as a single partition over its own
    /// location, so sampling and input selection share one code path.
    pub fn pseudo_partition(&self) -> Partition {
        Partition {
            spec: IndexMap::new(),
            location: self.location.clone(),
            files: self.files.clone(),
        }
    }

    /// Add partition columns.
    pub fn partitioned_by(mut self, cols: Vec<&str>) -> Self {
        self.partition_cols = cols.into_iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add clustering columns and a bucket count.
    pub fn clustered_by(mut self, cols: Vec<&str>, num_buckets: usize) -> Self {
        self.bucket_cols = cols.into_iter().map(|c| c.to_string()).collect();
        self.num_buckets = num_buckets;
        self
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_cols.is_empty()
    }

    pub fn is_partition_col(&self, name: &str) -> bool {
        self.partition_cols
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Schema ref of the data columns.
    pub fn schema_ref(&self) -> SchemaRef {
        Arc::new(self.schema.clone())
    }

    /// Full row shape a scan of this table produces: data columns followed
    /// by string-typed partition columns.
    pub fn row_fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self
            .schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        for p in &self.partition_cols {
            fields.push(Field::new(p, DataType::Utf8, true));
        }
        fields
    }
}

/// One partition of a table: its partition-column values, location, and
/// the data files under it.
///
/// The file list is recorded by the metastore so bucket selection does not
/// touch the filesystem during compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    /// Partition column name to value, in partition-column order.
    pub spec: IndexMap<String, String>,
    pub location: String,
    /// Data file names under `location`, unordered.
    pub files: Vec<String>,
}

impl Partition {
    pub fn new(spec: Vec<(&str, &str)>, location: impl Into<String>, files: Vec<&str>) -> Self {
        Partition {
            spec: spec
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            location: location.into(),
            files: files.into_iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Value of one partition column, if present in the spec.
    pub fn value(&self, col: &str) -> Option<&str> {
        self.spec
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(col))
            .map(|(_, v)| v.as_str())
    }

    /// Partition name in `col=value/...` form.
    pub fn name(&self) -> String {
        self.spec
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Files sorted so bucket selection is deterministic when several
    /// files decode to the same bucket number.
    fn sorted_files(&self) -> Vec<String> {
        let mut files = self.files.clone();
        files.sort();
        files
    }

    /// Full path of bucket `bucket_num` within this partition.
    ///
    /// The bucket is located by the number encoded in the file name, not
    /// by position, so sparse bucket sets and non-bucket files (job
    /// markers and the like, which all decode to bucket 0) cannot shift
    /// the mapping. A file with an explicit `part-NNNNN` number wins over
    /// the bucket-0 fallback.
    pub fn bucket_path(&self, bucket_num: usize) -> Result<String, MetastoreError> {
        let files = self.sorted_files();
        let file = files
            .iter()
            .find(|f| encoded_bucket_num(f) == Some(bucket_num))
            .or_else(|| files.iter().find(|f| bucket_num_from_file(f) == bucket_num))
            .ok_or_else(|| {
                MetastoreError::Storage(format!(
                    "partition {} has no bucket {bucket_num}",
                    self.name()
                ))
            })?;
        Ok(format!("{}/{}", self.location, file))
    }

    /// Paths covering bucket `numerator` out of `denominator`, given the
    /// table-level bucket count. Falls back to the whole partition when
    /// the table is not bucketed.
    ///
    /// The denominator must divide, or be divided by, the bucket count.
    pub fn sample_paths(
        &self,
        numerator: usize,
        denominator: usize,
        bucket_count: usize,
    ) -> Result<Vec<String>, MetastoreError> {
        if bucket_count == 0 {
            return Ok(vec![self.location.clone()]);
        }
        if bucket_count == denominator {
            return Ok(vec![self.bucket_path(numerator - 1)?]);
        }
        if bucket_count < denominator {
            if denominator % bucket_count != 0 {
                return Err(MetastoreError::Storage(format!(
                    "sample denominator {denominator} is not a multiple of bucket count {bucket_count}"
                )));
            }
            // undersampling one bucket
            return Ok(vec![self.bucket_path((numerator - 1) % bucket_count)?]);
        }
        if bucket_count % denominator != 0 {
            return Err(MetastoreError::Storage(format!(
                "sample denominator {denominator} is not a divisor of bucket count {bucket_count}"
            )));
        }
        // sampling multiple buckets
        (0..bucket_count / denominator)
            .map(|i| self.bucket_path(i * denominator + (numerator - 1)))
            .collect()
    }
}

/// Bucket number encoded in a data file name (`part-NNNNN`), 0 for
/// anything else.
pub fn bucket_num_from_file(name: &str) -> usize {
    encoded_bucket_num(name).unwrap_or(0)
}

/// The explicit `part-NNNNN` number of a file name, `None` when the name
/// does not carry one.
fn encoded_bucket_num(name: &str) -> Option<usize> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"part-([0-9]{5})").expect("bucket file pattern"));
    re.captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
}
