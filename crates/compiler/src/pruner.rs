//! Partition pruning: decide from the WHERE and ON predicates which
//! partitions of a table a query actually needs.

use qry_ast::{AstNode, TokenKind};
use qry_common::{Datum, Result, SemanticError};
use qry_metastore::{Metastore, Partition, Table};
use tracing::debug;

/// Outcome of pruning one alias.
///
/// `confirmed` partitions definitely satisfy every predicate that could
/// be decided from partition-column values alone; `unknown` partitions
/// could not be decided without reading data (a predicate references
/// non-partition columns, another alias, or a function the compiler does
/// not evaluate).
#[derive(Debug, Clone)]
pub struct PrunedPartitions {
    pub confirmed: Vec<Partition>,
    pub unknown: Vec<Partition>,
}

impl PrunedPartitions {
    pub fn has_unknown(&self) -> bool {
        !self.unknown.is_empty()
    }
}

/// Three-valued predicate outcome over a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tri {
    True,
    False,
    Unknown,
}

/// Per-alias pruner accumulating predicates from WHERE clauses and join
/// conditions.
#[derive(Debug)]
pub struct PartitionPruner {
    alias: String,
    table: Table,
    exprs: Vec<AstNode>,
}

impl PartitionPruner {
    pub fn new(alias: impl Into<String>, table: Table) -> Self {
        PartitionPruner {
            alias: alias.into(),
            table,
            exprs: Vec::new(),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Add a WHERE predicate. All accumulated predicates are conjoined.
    pub fn add_expression(&mut self, expr: &AstNode) {
        self.exprs.push(expr.clone());
    }

    /// Add a predicate coming from a join condition.
    pub fn add_join_expression(&mut self, expr: &AstNode) {
        self.exprs.push(expr.clone());
    }

    /// Whether every column reference in `expr` is a partition column of
    /// this alias. An OR mixing partition and non-partition columns is
    /// therefore not a partition predicate.
    pub fn has_partition_predicate(&self, expr: &AstNode) -> bool {
        match expr.kind() {
            TokenKind::ColRef => self.colref_partition_col(expr).is_some(),
            _ => expr
                .children()
                .iter()
                .all(|c| self.has_partition_predicate(c)),
        }
    }

    /// Whether all accumulated predicates are partition predicates, i.e.
    /// pruning alone fully decides the input set.
    pub fn contains_partition_cols(&self) -> bool {
        self.exprs.iter().all(|e| self.has_partition_predicate(e))
    }

    /// Enumerate the table's partitions and split them into confirmed and
    /// undecidable under the accumulated predicates.
    pub fn prune(&self, metastore: &dyn Metastore) -> Result<PrunedPartitions> {
        let partitions = metastore
            .list_partitions(&self.table)
            .map_err(SemanticError::generic)?;

        let mut out = PrunedPartitions {
            confirmed: Vec::new(),
            unknown: Vec::new(),
        };
        for partition in partitions {
            let mut acc = Tri::True;
            for expr in &self.exprs {
                acc = and3(acc, self.eval(expr, &partition));
                if acc == Tri::False {
                    break;
                }
            }
            match acc {
                Tri::True => out.confirmed.push(partition),
                Tri::Unknown => out.unknown.push(partition),
                Tri::False => {}
            }
        }
        debug!(
            alias = %self.alias,
            confirmed = out.confirmed.len(),
            unknown = out.unknown.len(),
            "pruned partitions"
        );
        Ok(out)
    }

    /// Partition-column name referenced by a COLREF of this alias; `None`
    /// for other aliases or non-partition columns.
    fn colref_partition_col<'a>(&self, colref: &'a AstNode) -> Option<&'a str> {
        let (tab, col) = if colref.child_count() == 2 {
            (
                Some(colref.child(0)?.text()),
                colref.child(1)?.text(),
            )
        } else {
            (None, colref.child(0)?.text())
        };
        if let Some(tab) = tab {
            if !tab.eq_ignore_ascii_case(&self.alias) {
                return None;
            }
        }
        if self.table.is_partition_col(col) {
            Some(col)
        } else {
            None
        }
    }

    fn eval(&self, expr: &AstNode, partition: &Partition) -> Tri {
        match self.eval_value(expr, partition) {
            Some(Datum::Boolean(true)) => Tri::True,
            Some(Datum::Boolean(false)) => Tri::False,
            _ => Tri::Unknown,
        }
    }

    /// Evaluate an expression over one partition's column values; `None`
    /// means undecidable.
    fn eval_value(&self, expr: &AstNode, partition: &Partition) -> Option<Datum> {
        match expr.kind() {
            TokenKind::ColRef => {
                let col = self.colref_partition_col(expr)?;
                partition.value(col).map(|v| Datum::Str(v.to_string()))
            }
            TokenKind::Number => {
                let text = expr.text();
                if let Ok(v) = text.parse::<i64>() {
                    Some(Datum::Int64(v))
                } else {
                    text.parse::<f64>().ok().map(Datum::Float64)
                }
            }
            TokenKind::StringLiteral => Some(Datum::Str(expr.text().to_string())),
            TokenKind::KwTrue => Some(Datum::Boolean(true)),
            TokenKind::KwFalse => Some(Datum::Boolean(false)),
            TokenKind::KwAnd => {
                let l = self.eval(expr.child(0)?, partition);
                let r = self.eval(expr.child(1)?, partition);
                tri_to_datum(and3(l, r))
            }
            TokenKind::KwOr => {
                let l = self.eval(expr.child(0)?, partition);
                let r = self.eval(expr.child(1)?, partition);
                tri_to_datum(or3(l, r))
            }
            TokenKind::KwNot => match self.eval(expr.child(0)?, partition) {
                Tri::True => Some(Datum::Boolean(false)),
                Tri::False => Some(Datum::Boolean(true)),
                Tri::Unknown => None,
            },
            TokenKind::Equal
            | TokenKind::NotEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                let l = self.eval_value(expr.child(0)?, partition)?;
                let r = self.eval_value(expr.child(1)?, partition)?;
                let ord = compare_coercing(&l, &r)?;
                let out = match expr.kind() {
                    TokenKind::Equal => ord == std::cmp::Ordering::Equal,
                    TokenKind::NotEqual => ord != std::cmp::Ordering::Equal,
                    TokenKind::Less => ord == std::cmp::Ordering::Less,
                    TokenKind::LessEqual => ord != std::cmp::Ordering::Greater,
                    TokenKind::Greater => ord == std::cmp::Ordering::Greater,
                    _ => ord != std::cmp::Ordering::Less,
                };
                Some(Datum::Boolean(out))
            }
            // UDFs and collection accesses need row data
            _ => None,
        }
    }
}

/// Compare two values, bridging string partition values against numeric
/// constants by parsing.
fn compare_coercing(l: &Datum, r: &Datum) -> Option<std::cmp::Ordering> {
    if let Some(ord) = l.compare(r) {
        return Some(ord);
    }
    match (l, r) {
        (Datum::Str(s), other) => {
            let parsed: f64 = s.parse().ok()?;
            Datum::Float64(parsed).compare(other)
        }
        (other, Datum::Str(s)) => {
            let parsed: f64 = s.parse().ok()?;
            other.compare(&Datum::Float64(parsed))
        }
        _ => None,
    }
}

fn and3(l: Tri, r: Tri) -> Tri {
    match (l, r) {
        (Tri::False, _) | (_, Tri::False) => Tri::False,
        (Tri::True, Tri::True) => Tri::True,
        _ => Tri::Unknown,
    }
}

fn or3(l: Tri, r: Tri) -> Tri {
    match (l, r) {
        (Tri::True, _) | (_, Tri::True) => Tri::True,
        (Tri::False, Tri::False) => Tri::False,
        _ => Tri::Unknown,
    }
}

fn tri_to_datum(t: Tri) -> Option<Datum> {
    match t {
        Tri::True => Some(Datum::Boolean(true)),
        Tri::False => Some(Datum::Boolean(false)),
        Tri::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field};
    use qry_ast::{build, TokenKind};
    use qry_metastore::{MemMetastore, Partition, Table};

    use super::PartitionPruner;

    fn partitioned_table() -> (Table, MemMetastore) {
        let table = Table::new(
            "src",
            vec![Field::new("key", DataType::Utf8, true)],
            "/warehouse/src",
        )
        .partitioned_by(vec!["ds"]);
        let mut ms = MemMetastore::new();
        ms.register_table(table.clone());
        for ds in ["2009-01-01", "2009-01-02"] {
            ms.add_partition(
                "src",
                Partition::new(
                    vec![("ds", ds)],
                    format!("/warehouse/src/ds={ds}"),
                    vec!["part-00000"],
                ),
            );
        }
        (table, ms)
    }

    #[test]
    fn equality_confirms_exactly_one_partition() {
        let (table, ms) = partitioned_table();
        let mut pruner = PartitionPruner::new("src", table);
        pruner.add_expression(&build::binary(
            TokenKind::Equal,
            build::col_ref(None, "ds"),
            build::string("2009-01-01"),
        ));
        let pruned = pruner.prune(&ms).expect("prune");
        assert_eq!(pruned.confirmed.len(), 1);
        assert_eq!(pruned.confirmed[0].value("ds"), Some("2009-01-01"));
        assert!(pruned.unknown.is_empty());
    }

    #[test]
    fn non_partition_column_lands_in_unknown() {
        let (table, ms) = partitioned_table();
        let mut pruner = PartitionPruner::new("src", table);
        pruner.add_expression(&build::binary(
            TokenKind::Equal,
            build::col_ref(None, "key"),
            build::string("x"),
        ));
        assert!(!pruner.has_partition_predicate(&build::binary(
            TokenKind::Equal,
            build::col_ref(None, "key"),
            build::string("x"),
        )));
        let pruned = pruner.prune(&ms).expect("prune");
        assert!(pruned.confirmed.is_empty());
        assert_eq!(pruned.unknown.len(), 2);
    }

    #[test]
    fn or_mixing_partition_and_data_columns_is_not_a_partition_predicate() {
        let (table, _) = partitioned_table();
        let pruner = PartitionPruner::new("src", table);
        let mixed = qry_ast::AstNode::node(
            TokenKind::KwOr,
            vec![
                build::binary(
                    TokenKind::Equal,
                    build::col_ref(None, "ds"),
                    build::string("2009-01-01"),
                ),
                build::binary(
                    TokenKind::Equal,
                    build::col_ref(None, "key"),
                    build::string("x"),
                ),
            ],
        );
        assert!(!pruner.has_partition_predicate(&mixed));
    }

    #[test]
    fn false_conjunct_excludes_partition() {
        let (table, ms) = partitioned_table();
        let mut pruner = PartitionPruner::new("src", table);
        pruner.add_expression(&build::binary(
            TokenKind::NotEqual,
            build::col_ref(Some("src"), "ds"),
            build::string("2009-01-01"),
        ));
        let pruned = pruner.prune(&ms).expect("prune");
        assert_eq!(pruned.confirmed.len(), 1);
        assert_eq!(pruned.confirmed[0].value("ds"), Some("2009-01-02"));
    }
}
