//! Map-side hash aggregation memory model.
//!
//! A HASH-mode group-by keeps per-key evaluator states in a hash table
//! local to one mapper. Entry size is estimated from the descriptor's key
//! and state types; variable-width (string) positions are sampled at
//! runtime and averaged. When the table reaches the estimated capacity,
//! 10% of the entries are flushed downstream as partial results.

use arrow_schema::DataType;
use indexmap::IndexMap;
use qry_common::{CompilerConfig, Datum};

use crate::plan::descs::GroupByDesc;

/// Re-estimate the variable-width component every this many sampled
/// entries.
pub const NUM_ROWS_ESTIMATE_SIZE: usize = 1000;

const OBJECT_OVERHEAD: usize = 16;
const HASH_ENTRY_OVERHEAD: usize = 64;
const PRIMITIVE_SIZE: usize = 16;
const UNKNOWN_TYPE_SIZE: usize = 256;

/// Per-aggregator evaluator state: one value slot per declared state
/// field.
pub type AggrStates = Vec<Vec<Datum>>;

/// Running estimate of hash-table entry size and the resulting capacity.
#[derive(Debug)]
struct EntrySizer {
    max_memory: usize,
    fixed_row_size: usize,
    /// Key positions with variable width (strings).
    var_key_positions: Vec<usize>,
    /// `(aggregator, state field)` positions with variable width.
    var_state_positions: Vec<(usize, usize)>,
    total_variable_size: usize,
    num_entries_var_size: usize,
    capacity: usize,
}

fn fixed_size_of(dt: &DataType, var: &mut bool) -> usize {
    match dt {
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::Float32
        | DataType::Float64 => PRIMITIVE_SIZE,
        DataType::Utf8 => {
            *var = true;
            OBJECT_OVERHEAD
        }
        _ => UNKNOWN_TYPE_SIZE,
    }
}

impl EntrySizer {
    fn new(conf: &CompilerConfig, desc: &GroupByDesc) -> Self {
        let max_memory =
            (conf.map_aggr_hash_memory as f64 * conf.max_heap_bytes as f64) as usize;

        let mut fixed = HASH_ENTRY_OVERHEAD;
        let mut var_key_positions = Vec::new();
        for (pos, key) in desc.keys.iter().enumerate() {
            let mut var = false;
            fixed += fixed_size_of(&key.data_type(), &mut var);
            if var {
                var_key_positions.push(pos);
            }
        }

        let mut var_state_positions = Vec::new();
        for (ai, agg) in desc.aggregators.iter().enumerate() {
            fixed += OBJECT_OVERHEAD;
            for (fi, state) in agg.evaluator.state_types.iter().enumerate() {
                let mut var = false;
                fixed += fixed_size_of(state, &mut var);
                if var {
                    var_state_positions.push((ai, fi));
                }
            }
        }

        EntrySizer {
            max_memory,
            fixed_row_size: fixed,
            var_key_positions,
            var_state_positions,
            total_variable_size: 0,
            num_entries_var_size: 0,
            capacity: 0,
        }
    }

    /// Sample the variable-width component from one entry and refresh the
    /// capacity.
    fn sample(&mut self, key: &[Datum], states: &AggrStates) {
        for &pos in &self.var_key_positions {
            if let Some(Datum::Str(s)) = key.get(pos) {
                self.total_variable_size += s.len();
            }
        }
        for &(ai, fi) in &self.var_state_positions {
            if let Some(Datum::Str(s)) = states.get(ai).and_then(|st| st.get(fi)) {
                self.total_variable_size += s.len();
            }
        }
        self.num_entries_var_size += 1;

        let avg_var = self.total_variable_size / self.num_entries_var_size;
        self.capacity = self.max_memory / (self.fixed_row_size + avg_var);
    }

    fn needs_sample(&self, num_entries: usize) -> bool {
        self.capacity == 0 || num_entries % NUM_ROWS_ESTIMATE_SIZE == 0
    }
}

/// The mapper-local hash table of a HASH-mode group-by.
#[derive(Debug)]
pub struct HashAggregator {
    sizer: EntrySizer,
    state_shape: Vec<usize>,
    map: IndexMap<Vec<Datum>, AggrStates>,
}

impl HashAggregator {
    pub fn new(conf: &CompilerConfig, desc: &GroupByDesc) -> Self {
        HashAggregator {
            sizer: EntrySizer::new(conf, desc),
            state_shape: desc
                .aggregators
                .iter()
                .map(|a| a.evaluator.state_types.len())
                .collect(),
            map: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Estimated entry capacity under the configured memory fraction; 0
    /// until the first sample.
    pub fn capacity(&self) -> usize {
        self.sizer.capacity
    }

    /// Aggregate one row into its key's entry. `update` receives the
    /// entry's states and whether the entry is new. Returns the entries
    /// evicted by a flush triggered by this row, in insertion order.
    pub fn process<F>(&mut self, key: Vec<Datum>, update: F) -> Vec<(Vec<Datum>, AggrStates)>
    where
        F: FnOnce(&mut AggrStates, bool),
    {
        let new_entry = !self.map.contains_key(&key);
        if new_entry {
            let states = self
                .state_shape
                .iter()
                .map(|&n| vec![Datum::Null; n])
                .collect();
            self.map.insert(key.clone(), states);
        }
        let states = self.map.get_mut(&key).expect("entry just ensured");
        update(states, new_entry);

        let num_entries = self.map.len();
        if self.sizer.needs_sample(num_entries) {
            let states = self.map.get(&key).expect("entry present");
            let sampled: AggrStates = states.clone();
            self.sizer.sample(&key, &sampled);
        }

        if num_entries >= self.sizer.capacity {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// Evict 10% of the entries (oldest first), returning them for
    /// forwarding downstream.
    fn flush(&mut self) -> Vec<(Vec<Datum>, AggrStates)> {
        let old_size = self.map.len();
        let evict = old_size.div_ceil(10);
        let mut out = Vec::with_capacity(evict);
        for _ in 0..evict {
            match self.map.shift_remove_index(0) {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        out
    }

    /// Drain every remaining entry, in insertion order.
    pub fn close(&mut self) -> Vec<(Vec<Datum>, AggrStates)> {
        self.map.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use qry_common::{CompilerConfig, Datum};
    use qry_functions::Registry;

    use crate::plan::descs::{AggregationDesc, GroupByDesc, GroupByMode};
    use crate::plan::exprs::ExprDesc;

    use super::HashAggregator;

    fn count_desc() -> GroupByDesc {
        let registry = Registry::with_builtins();
        let count = registry
            .get_udaf_evaluator("count", &[DataType::Utf8])
            .expect("count");
        GroupByDesc {
            mode: GroupByMode::Hash,
            keys: vec![ExprDesc::column(DataType::Int64, "0")],
            aggregators: vec![AggregationDesc {
                evaluator: count,
                parameters: vec![ExprDesc::column(DataType::Utf8, "1")],
                distinct: false,
            }],
            eval_methods: vec!["terminatePartial".to_string()],
            agg_methods: vec!["iterate".to_string()],
        }
    }

    fn tiny_conf(entries: usize) -> CompilerConfig {
        // fixed entry size for an int key + one int-state aggregator:
        // 64 + 16 + 16 + 16 = 112 bytes
        CompilerConfig {
            map_aggr_hash_memory: 1.0,
            max_heap_bytes: 112 * entries,
            ..CompilerConfig::default()
        }
    }

    fn bump_count(states: &mut super::AggrStates, _new: bool) {
        let c = states[0][0].as_i64().unwrap_or(0);
        states[0][0] = Datum::Int64(c + 1);
    }

    #[test]
    fn capacity_tracks_configured_memory() {
        let mut aggr = HashAggregator::new(&tiny_conf(50), &count_desc());
        let flushed = aggr.process(vec![Datum::Int64(0)], bump_count);
        assert!(flushed.is_empty());
        assert_eq!(aggr.capacity(), 50);
    }

    #[test]
    fn flush_evicts_ten_percent_oldest_first() {
        let mut aggr = HashAggregator::new(&tiny_conf(50), &count_desc());
        let mut flushed = Vec::new();
        for i in 0..50 {
            flushed.extend(aggr.process(vec![Datum::Int64(i)], bump_count));
        }
        // the 50th insert hits capacity and evicts ceil(50/10) = 5
        assert_eq!(flushed.len(), 5);
        assert_eq!(flushed[0].0, vec![Datum::Int64(0)]);
        assert_eq!(aggr.len(), 45);
        // table never exceeded capacity between flush cycles
        assert!(aggr.len() <= aggr.capacity());
    }

    #[test]
    fn close_drains_everything() {
        let mut aggr = HashAggregator::new(&tiny_conf(100), &count_desc());
        for i in 0..7 {
            aggr.process(vec![Datum::Int64(i % 3)], bump_count);
        }
        assert_eq!(aggr.len(), 3);
        let drained = aggr.close();
        assert_eq!(drained.len(), 3);
        assert!(aggr.is_empty());
        // three keys saw 3, 2, 2 rows
        let counts: Vec<i64> = drained
            .iter()
            .map(|(_, st)| st[0][0].as_i64().expect("count"))
            .collect();
        assert_eq!(counts.iter().sum::<i64>(), 7);
    }

    #[test]
    fn string_keys_shrink_capacity() {
        let registry = Registry::with_builtins();
        let count = registry
            .get_udaf_evaluator("count", &[DataType::Utf8])
            .expect("count");
        let desc = GroupByDesc {
            mode: GroupByMode::Hash,
            keys: vec![ExprDesc::column(DataType::Utf8, "0")],
            aggregators: vec![AggregationDesc {
                evaluator: count,
                parameters: vec![ExprDesc::column(DataType::Utf8, "1")],
                distinct: false,
            }],
            eval_methods: vec!["terminatePartial".to_string()],
            agg_methods: vec!["iterate".to_string()],
        };
        let conf = CompilerConfig {
            map_aggr_hash_memory: 1.0,
            max_heap_bytes: 112 * 100,
            ..CompilerConfig::default()
        };
        let mut aggr = HashAggregator::new(&conf, &desc);
        aggr.process(
            vec![Datum::Str("a-rather-long-grouping-key".to_string())],
            bump_count,
        );
        // fixed: 64 + 16(obj) + 16(agg obj) + 16(state) = 112, plus the
        // sampled 26-byte string average
        assert_eq!(aggr.capacity(), (112 * 100) / (112 + 26));
    }
}
