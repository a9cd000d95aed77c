//! Per-operator name resolution: `(table alias, column name)` to internal
//! column position and type.

use arrow_schema::DataType;
use indexmap::IndexMap;
use qry_common::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Internal name and type of one column in an operator's output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub internal_name: String,
    pub data_type: DataType,
}

impl ColumnInfo {
    pub fn new(internal_name: impl Into<String>, data_type: DataType) -> Self {
        ColumnInfo {
            internal_name: internal_name.into(),
            data_type,
        }
    }
}

/// Two-level mapping `table alias -> column name -> ColumnInfo` with a
/// reverse index by internal name.
///
/// Aliases and column names are case-insensitive; insertion order is
/// preserved on both levels so projections come out deterministic.
/// Expression resolvers (group-by and reduce-sink outputs) key
/// pre-computed expressions by canonical text under the empty alias.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowResolver {
    map: IndexMap<String, IndexMap<String, ColumnInfo>>,
    inv: HashMap<String, (String, String)>,
    expr_resolver: bool,
}

impl RowResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver keyed by canonical expression text instead of column
    /// names.
    pub fn expr_resolver() -> Self {
        RowResolver {
            expr_resolver: true,
            ..Self::default()
        }
    }

    pub fn is_expr_resolver(&self) -> bool {
        self.expr_resolver
    }

    /// Record a column. The first mapping wins in the reverse index, so
    /// an internal name always reverse-resolves to its first exposure.
    pub fn put(&mut self, alias: &str, column: &str, info: ColumnInfo) {
        let alias_key = alias.to_lowercase();
        let col_key = if self.expr_resolver {
            column.to_string()
        } else {
            column.to_lowercase()
        };
        self.inv
            .entry(info.internal_name.clone())
            .or_insert_with(|| (alias_key.clone(), col_key.clone()));
        self.map.entry(alias_key).or_default().insert(col_key, info);
    }

    /// Exact lookup under one alias (the empty alias for expression
    /// resolvers).
    pub fn get(&self, alias: &str, column: &str) -> Option<&ColumnInfo> {
        let col_key = if self.expr_resolver {
            column.to_string()
        } else {
            column.to_lowercase()
        };
        self.map.get(&alias.to_lowercase())?.get(&col_key)
    }

    /// Lookup ignoring the alias; ambiguous when the column name occurs
    /// under several aliases.
    pub fn get_unqualified(&self, column: &str) -> Result<Option<&ColumnInfo>> {
        let col_key = column.to_lowercase();
        let mut found: Option<&ColumnInfo> = None;
        for cols in self.map.values() {
            if let Some(info) = cols.get(&col_key) {
                if found.is_some() {
                    return Err(ErrorKind::AmbiguousColumn.with(column.to_string()));
                }
                found = Some(info);
            }
        }
        Ok(found)
    }

    pub fn has_table_alias(&self, alias: &str) -> bool {
        self.map.contains_key(&alias.to_lowercase())
    }

    /// Aliases in insertion order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(|s| s.as_str())
    }

    /// Columns recorded under one alias, in insertion order.
    pub fn field_map(&self, alias: &str) -> Option<&IndexMap<String, ColumnInfo>> {
        self.map.get(&alias.to_lowercase())
    }

    /// All columns in insertion order across aliases.
    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        self.map
            .values()
            .flat_map(|cols| cols.values().cloned())
            .collect()
    }

    /// `(alias, column)` a given internal name was first exposed under.
    pub fn reverse_lookup(&self, internal_name: &str) -> Option<(&str, &str)> {
        self.inv
            .get(internal_name)
            .map(|(a, c)| (a.as_str(), c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;

    use super::{ColumnInfo, RowResolver};

    #[test]
    fn order_and_reverse_lookup() {
        let mut rr = RowResolver::new();
        rr.put("T", "Key", ColumnInfo::new("0", DataType::Utf8));
        rr.put("t", "value", ColumnInfo::new("1", DataType::Int64));
        let infos = rr.column_infos();
        assert_eq!(infos[0].internal_name, "0");
        assert_eq!(infos[1].internal_name, "1");
        assert_eq!(rr.reverse_lookup("1"), Some(("t", "value")));
        assert!(rr.get("T", "KEY").is_some());
    }

    #[test]
    fn unqualified_ambiguity() {
        let mut rr = RowResolver::new();
        rr.put("a", "k", ColumnInfo::new("0", DataType::Utf8));
        rr.put("b", "k", ColumnInfo::new("1", DataType::Utf8));
        assert!(rr.get_unqualified("k").is_err());
        assert!(rr.get_unqualified("missing").expect("ok").is_none());
    }

    #[test]
    fn expr_resolver_keys_are_case_sensitive_text() {
        let mut rr = RowResolver::expr_resolver();
        rr.put("", "(TOK_FUNCTION count 1)", ColumnInfo::new("0", DataType::Int64));
        assert!(rr.get("", "(TOK_FUNCTION count 1)").is_some());
        assert!(rr.get("", "(tok_function count 1)").is_none());
    }
}
