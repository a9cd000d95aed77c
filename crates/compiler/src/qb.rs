//! Query block model: the intermediate representation one `SELECT` (with
//! all its destinations and clauses) is parsed into before planning.

use indexmap::IndexMap;
use qry_ast::{AstNode, TokenKind};
use qry_metastore::{Partition, Table};

/// `TABLESAMPLE(BUCKET n OUT OF d [ON cols])` attached to a table
/// reference.
#[derive(Debug, Clone)]
pub struct TableSample {
    pub numerator: usize,
    pub denominator: usize,
    /// Explicit `ON` expressions; empty means "use the bucketing columns".
    pub exprs: Vec<AstNode>,
    /// Whether selecting input buckets is possible for this sample;
    /// decided during table planning.
    pub input_pruning: bool,
}

impl TableSample {
    pub fn new(numerator: usize, denominator: usize, exprs: Vec<AstNode>) -> Self {
        TableSample {
            numerator,
            denominator,
            exprs,
            input_pruning: false,
        }
    }
}

/// Per-destination clause trees collected by the phase-1 walk, keyed by
/// destination name (`insclause-N`, or `reduce` before any destination
/// token is seen).
#[derive(Debug, Default)]
pub struct QBParseInfo {
    is_subquery: bool,
    /// Outer alias when this QB is a subquery.
    alias: Option<String>,

    dest_to_sel_expr: IndexMap<String, AstNode>,
    dest_to_where_expr: IndexMap<String, AstNode>,
    dest_to_group_by: IndexMap<String, AstNode>,
    dest_to_cluster_by: IndexMap<String, AstNode>,
    dest_to_distribute_by: IndexMap<String, AstNode>,
    dest_to_sort_by: IndexMap<String, AstNode>,
    dest_to_limit: IndexMap<String, usize>,
    dest_to_dest: IndexMap<String, AstNode>,
    /// Aggregation subtrees per destination, keyed by canonical text.
    dest_to_aggregations: IndexMap<String, IndexMap<String, AstNode>>,
    dest_to_distinct_func: IndexMap<String, AstNode>,

    alias_to_src: IndexMap<String, AstNode>,
    alias_to_sample: IndexMap<String, TableSample>,
    join_expr: Option<AstNode>,
    outer_query_limit: Option<usize>,
}

impl QBParseInfo {
    pub fn new(alias: Option<String>, is_subquery: bool) -> Self {
        QBParseInfo {
            is_subquery,
            alias,
            ..Self::default()
        }
    }

    pub fn is_subquery(&self) -> bool {
        self.is_subquery
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Destination names, in the order their select clauses were seen.
    pub fn clause_names(&self) -> impl Iterator<Item = &str> {
        self.dest_to_sel_expr.keys().map(|s| s.as_str())
    }

    /// Destination names that have an explicit destination target.
    pub fn clause_names_for_dest(&self) -> impl Iterator<Item = &str> {
        self.dest_to_dest.keys().map(|s| s.as_str())
    }

    pub fn set_sel_expr(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_sel_expr.insert(dest.to_string(), tree);
    }

    pub fn sel_expr(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_sel_expr.get(dest)
    }

    pub fn set_where_expr(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_where_expr.insert(dest.to_string(), tree);
    }

    pub fn where_expr(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_where_expr.get(dest)
    }

    pub fn has_any_where(&self) -> bool {
        !self.dest_to_where_expr.is_empty()
    }

    pub fn set_group_by(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_group_by.insert(dest.to_string(), tree);
    }

    pub fn group_by(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_group_by.get(dest)
    }

    pub fn set_cluster_by(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_cluster_by.insert(dest.to_string(), tree);
    }

    pub fn cluster_by(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_cluster_by.get(dest)
    }

    pub fn has_any_cluster_by(&self) -> bool {
        !self.dest_to_cluster_by.is_empty()
    }

    pub fn set_distribute_by(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_distribute_by.insert(dest.to_string(), tree);
    }

    pub fn distribute_by(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_distribute_by.get(dest)
    }

    pub fn has_any_distribute_by(&self) -> bool {
        !self.dest_to_distribute_by.is_empty()
    }

    pub fn set_sort_by(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_sort_by.insert(dest.to_string(), tree);
    }

    pub fn sort_by(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_sort_by.get(dest)
    }

    pub fn has_any_sort_by(&self) -> bool {
        !self.dest_to_sort_by.is_empty()
    }

    pub fn set_limit(&mut self, dest: &str, limit: usize) {
        self.dest_to_limit.insert(dest.to_string(), limit);
    }

    pub fn limit(&self, dest: &str) -> Option<usize> {
        self.dest_to_limit.get(dest).copied()
    }

    pub fn set_dest(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_dest.insert(dest.to_string(), tree);
    }

    pub fn dest(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_dest.get(dest)
    }

    pub fn set_aggregations(&mut self, dest: &str, aggs: IndexMap<String, AstNode>) {
        self.dest_to_aggregations.insert(dest.to_string(), aggs);
    }

    pub fn aggregations(&self, dest: &str) -> Option<&IndexMap<String, AstNode>> {
        self.dest_to_aggregations.get(dest)
    }

    pub fn set_distinct_func(&mut self, dest: &str, tree: AstNode) {
        self.dest_to_distinct_func.insert(dest.to_string(), tree);
    }

    pub fn distinct_func(&self, dest: &str) -> Option<&AstNode> {
        self.dest_to_distinct_func.get(dest)
    }

    pub fn set_src_for_alias(&mut self, alias: &str, tree: AstNode) {
        self.alias_to_src.insert(alias.to_lowercase(), tree);
    }

    pub fn src_for_alias(&self, alias: &str) -> Option<&AstNode> {
        self.alias_to_src.get(&alias.to_lowercase())
    }

    pub fn set_table_sample(&mut self, alias: &str, sample: TableSample) {
        self.alias_to_sample.insert(alias.to_lowercase(), sample);
    }

    pub fn table_sample(&self, alias: &str) -> Option<&TableSample> {
        self.alias_to_sample.get(&alias.to_lowercase())
    }

    pub fn table_sample_mut(&mut self, alias: &str) -> Option<&mut TableSample> {
        self.alias_to_sample.get_mut(&alias.to_lowercase())
    }

    pub fn set_join_expr(&mut self, tree: AstNode) {
        self.join_expr = Some(tree);
    }

    pub fn join_expr(&self) -> Option<&AstNode> {
        self.join_expr.as_ref()
    }

    pub fn set_outer_query_limit(&mut self, limit: usize) {
        self.outer_query_limit = Some(limit);
    }

    pub fn outer_query_limit(&self) -> Option<usize> {
        self.outer_query_limit
    }
}

/// Destination resolved against the metastore.
#[derive(Debug, Clone)]
pub enum Dest {
    Table(Table),
    Partition { table: Table, partition: Partition },
    File { path: String, is_dfs: bool },
}

/// Metadata bound per alias and per destination.
#[derive(Debug, Default)]
pub struct QBMetaData {
    alias_to_table: IndexMap<String, Table>,
    name_to_dest: IndexMap<String, Dest>,
}

impl QBMetaData {
    pub fn set_src_for_alias(&mut self, alias: &str, table: Table) {
        self.alias_to_table.insert(alias.to_lowercase(), table);
    }

    pub fn table_for_alias(&self, alias: &str) -> Option<&Table> {
        self.alias_to_table.get(&alias.to_lowercase())
    }

    pub fn alias_to_table(&self) -> &IndexMap<String, Table> {
        &self.alias_to_table
    }

    pub fn set_dest(&mut self, name: &str, dest: Dest) {
        self.name_to_dest.insert(name.to_string(), dest);
    }

    pub fn dest(&self, name: &str) -> Option<&Dest> {
        self.name_to_dest.get(name)
    }
}

/// A query-block expression: a plain block, or a UNION ALL of two.
#[derive(Debug)]
pub enum QBExprKind {
    Query(QB),
    Union(Box<QBExpr>, Box<QBExpr>),
}

/// Query-block expression with its alias in the enclosing scope.
#[derive(Debug)]
pub struct QBExpr {
    pub alias: String,
    pub kind: QBExprKind,
}

/// One query block.
#[derive(Debug)]
pub struct QB {
    /// Path-like id used to qualify nested aliases (`subq:t`).
    id: Option<String>,
    num_sels: usize,
    num_sel_di: usize,
    is_query: bool,
    tab_alias_to_name: IndexMap<String, String>,
    subq_aliases: IndexMap<String, QBExpr>,
    parse_info: QBParseInfo,
    metadata: QBMetaData,
    join_tree: Option<crate::join::JoinTree>,
}

impl QB {
    /// New block. The id is derived from the enclosing block's id and this
    /// block's alias, giving nested blocks path-like ids (`outer:inner`).
    pub fn new(outer_id: Option<&str>, alias: Option<&str>, is_subquery: bool) -> Self {
        let id = match (outer_id, alias) {
            (None, None) => None,
            (None, Some(a)) => Some(a.to_string()),
            (Some(o), None) => Some(o.to_string()),
            (Some(o), Some(a)) => Some(format!("{o}:{a}")),
        };
        QB {
            id,
            num_sels: 0,
            num_sel_di: 0,
            is_query: false,
            tab_alias_to_name: IndexMap::new(),
            subq_aliases: IndexMap::new(),
            parse_info: QBParseInfo::new(alias.map(|a| a.to_string()), is_subquery),
            metadata: QBMetaData::default(),
            join_tree: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Alias qualified with this block's id, the key used for pruners and
    /// top operators.
    pub fn alias_id(&self, alias: &str) -> String {
        match &self.id {
            Some(id) => format!("{id}:{alias}"),
            None => alias.to_string(),
        }
    }

    pub fn parse_info(&self) -> &QBParseInfo {
        &self.parse_info
    }

    pub fn parse_info_mut(&mut self) -> &mut QBParseInfo {
        &mut self.parse_info
    }

    pub fn metadata(&self) -> &QBMetaData {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut QBMetaData {
        &mut self.metadata
    }

    pub fn count_sel(&mut self) {
        self.num_sels += 1;
    }

    pub fn count_sel_di(&mut self) {
        self.num_sel_di += 1;
    }

    /// Whether `alias` is already taken by a table or subquery.
    pub fn exists(&self, alias: &str) -> bool {
        let key = alias.to_lowercase();
        self.tab_alias_to_name.contains_key(&key) || self.subq_aliases.contains_key(&key)
    }

    pub fn set_tab_alias(&mut self, alias: &str, table_name: &str) {
        self.tab_alias_to_name
            .insert(alias.to_lowercase(), table_name.to_string());
    }

    pub fn tab_aliases(&self) -> impl Iterator<Item = &str> {
        self.tab_alias_to_name.keys().map(|s| s.as_str())
    }

    pub fn num_tab_aliases(&self) -> usize {
        self.tab_alias_to_name.len()
    }

    pub fn tab_name_for_alias(&self, alias: &str) -> Option<&str> {
        self.tab_alias_to_name
            .get(&alias.to_lowercase())
            .map(|s| s.as_str())
    }

    pub fn set_subq_alias(&mut self, alias: &str, qbexpr: QBExpr) {
        self.subq_aliases.insert(alias.to_lowercase(), qbexpr);
    }

    pub fn subq_aliases(&self) -> impl Iterator<Item = &str> {
        self.subq_aliases.keys().map(|s| s.as_str())
    }

    pub fn subq_alias_names(&self) -> Vec<String> {
        self.subq_aliases.keys().cloned().collect()
    }

    pub fn subq_for_alias(&self, alias: &str) -> Option<&QBExpr> {
        self.subq_aliases.get(&alias.to_lowercase())
    }

    pub fn subq_for_alias_mut(&mut self, alias: &str) -> Option<&mut QBExpr> {
        self.subq_aliases.get_mut(&alias.to_lowercase())
    }

    pub fn set_is_query(&mut self, is_query: bool) {
        self.is_query = is_query;
    }

    /// Top-level read whose single destination is a temporary file.
    pub fn is_query(&self) -> bool {
        self.is_query
    }

    pub fn set_join_tree(&mut self, tree: Option<crate::join::JoinTree>) {
        self.join_tree = tree;
    }

    pub fn join_tree(&self) -> Option<&crate::join::JoinTree> {
        self.join_tree.as_ref()
    }

    pub fn take_join_tree(&mut self) -> Option<crate::join::JoinTree> {
        self.join_tree.take()
    }

    /// `SELECT *` over a single base table with no aggregation, the shape
    /// eligible for the fetch fast path.
    pub fn is_select_star_query(&self) -> bool {
        if !self.subq_aliases.is_empty()
            || self.tab_alias_to_name.len() != 1
            || self.parse_info.join_expr().is_some()
            || self.num_sel_di > 0
        {
            return false;
        }
        let mut clauses = 0;
        for dest in self.parse_info.clause_names() {
            clauses += 1;
            let sel = match self.parse_info.sel_expr(dest) {
                Some(s) => s,
                None => return false,
            };
            if self
                .parse_info
                .aggregations(dest)
                .map(|a| !a.is_empty())
                .unwrap_or(false)
                || self.parse_info.group_by(dest).is_some()
            {
                return false;
            }
            if sel.child_count() != 1 {
                return false;
            }
            let item = match sel.child(0).and_then(|se| se.child(0)) {
                Some(i) => i,
                None => return false,
            };
            if item.kind() != TokenKind::AllColRef {
                return false;
            }
        }
        clauses == 1
    }
}
