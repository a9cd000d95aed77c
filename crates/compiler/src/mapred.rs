//! Map/reduce task planning: walk the operator DAG top-down with a
//! regex-dispatched rule set, cutting it at reduce-sink boundaries into a
//! dependency graph of jobs, with a fetch fast path for trivial queries.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use qry_common::{ErrorKind, Result, TaskId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::SemanticAnalyzer;
use crate::ops::{OpHandle, OperatorDesc};
use crate::plan::descs::TableDesc;
use crate::plan::work::{FetchWork, MapRedWork, MoveWork, PartitionDesc};
use crate::qb::QB;
use crate::rules::{dispatch, stack_string, Rule};

/// Work carried by one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskWork {
    MapRed(MapRedWork),
    Move(MoveWork),
    Fetch(FetchWork),
}

/// One schedulable task with its dependency edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub work: TaskWork,
    pub parents: Vec<TaskId>,
    pub children: Vec<TaskId>,
}

/// Dependency graph of the tasks one query compiles into.
///
/// `fetch_task` is the read-only task streaming the final result; on the
/// fast path it is the only task, otherwise it runs after every job task
/// completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
    pub root_tasks: Vec<TaskId>,
    pub fetch_task: Option<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, work: TaskWork) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task {
            id,
            work,
            parents: Vec::new(),
            children: Vec::new(),
        });
        id
    }

    pub fn add_dependency(&mut self, parent: TaskId, child: TaskId) {
        if !self.tasks[parent.0].children.contains(&child) {
            self.tasks[parent.0].children.push(child);
        }
        if !self.tasks[child.0].parents.contains(&parent) {
            self.tasks[child.0].parents.push(parent);
        }
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    fn work_mut(&mut self, id: TaskId) -> &mut TaskWork {
        &mut self.tasks[id.0].work
    }

    /// Map/reduce tasks in graph order.
    pub fn mapred_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.work, TaskWork::MapRed(_)))
    }

    /// Drop empty, edgeless map/reduce tasks (left behind when a scan's
    /// branch merged into an existing join task) and re-number ids.
    fn compact(self) -> TaskGraph {
        let keep: Vec<bool> = self
            .tasks
            .iter()
            .map(|t| match &t.work {
                TaskWork::MapRed(w) => {
                    !(w.alias_to_work.is_empty()
                        && w.reducer.is_none()
                        && t.parents.is_empty()
                        && t.children.is_empty())
                }
                _ => true,
            })
            .collect();
        let mut remap: HashMap<TaskId, TaskId> = HashMap::new();
        let mut next = 0usize;
        for (i, keep_it) in keep.iter().enumerate() {
            if *keep_it {
                remap.insert(TaskId(i), TaskId(next));
                next += 1;
            }
        }

        let mut out = TaskGraph::new();
        for task in self.tasks.into_iter() {
            if !keep[task.id.0] {
                continue;
            }
            let id = remap[&task.id];
            out.tasks.push(Task {
                id,
                work: task.work,
                parents: task.parents.iter().map(|p| remap[p]).collect(),
                children: task.children.iter().map(|c| remap[c]).collect(),
            });
        }
        out.root_tasks = out
            .tasks
            .iter()
            .filter(|t| t.parents.is_empty() && !matches!(t.work, TaskWork::Fetch(_)))
            .map(|t| t.id)
            .collect();
        out.fetch_task = self.fetch_task.map(|f| remap[&f]);
        out
    }
}

fn mr_rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Rule::new("R1", "TS%$"),
            Rule::new("R2", "TS%.*RS%$"),
            Rule::new("R3", "RS%.*RS%$"),
            Rule::new("R4", "FS%$"),
        ]
    })
}

/// Walk state threaded through the rule processors.
struct GenMrCtx {
    graph: TaskGraph,
    /// Reducer operator to the task that owns it.
    op_task_map: HashMap<OpHandle, TaskId>,
    /// Per-operator current context: task, current top operator, alias.
    map_curr_ctx: HashMap<OpHandle, (TaskId, OpHandle, String)>,
    /// Top operators whose map work is already attached to a task.
    seen_tops: HashSet<OpHandle>,
    mv_task: Option<TaskId>,
}

impl SemanticAnalyzer<'_> {
    /// Cut the operator DAG into a task graph.
    pub(crate) fn gen_mapred_tasks(&mut self, qb: &QB) -> Result<TaskGraph> {
        // Fast path: a plain `SELECT *` over one table with a fully
        // decided input set needs no job at all.
        if let Some(fetch) = self.try_fetch_fast_path(qb)? {
            let mut graph = TaskGraph::new();
            let id = graph.add_task(TaskWork::Fetch(fetch));
            graph.fetch_task = Some(id);
            debug!("using fetch fast path");
            return Ok(graph);
        }

        let mut ctx = GenMrCtx {
            graph: TaskGraph::new(),
            op_task_map: HashMap::new(),
            map_curr_ctx: HashMap::new(),
            seen_tops: HashSet::new(),
            mv_task: None,
        };

        let mut fetch_task: Option<FetchWork> = None;
        if qb.is_query() {
            // a plain select fetches its temporary result instead of
            // moving it anywhere
            if !self.load_table_work.is_empty() || self.load_file_work.len() != 1 {
                return Err(ErrorKind::Generic.with("unexpected load work for a plain select"));
            }
            let load = &self.load_file_work[0];
            fetch_task = Some(FetchWork {
                source_paths: vec![load.source_dir.clone()],
                partition_info: Vec::new(),
                table_info: TableDesc::text(
                    load.columns.split(',').map(|c| c.to_string()).collect(),
                ),
                limit: qb.parse_info().outer_query_limit(),
            });
        } else {
            let mv = MoveWork {
                load_table_work: self.load_table_work.clone(),
                load_file_work: self.load_file_work.clone(),
            };
            ctx.mv_task = Some(ctx.graph.add_task(TaskWork::Move(mv)));
        }

        let tops: Vec<OpHandle> = self.top_ops.values().copied().collect();
        for top in tops {
            let mut stack = Vec::new();
            let mut dispatched = HashSet::new();
            self.walk_mr(top, &mut stack, &mut dispatched, &mut ctx)?;
        }

        // reduce sinks end their map stage; drop their child edges so
        // reducers are not traversed as map operators again
        for h in self.arena.handles().collect::<Vec<_>>() {
            if matches!(self.arena.desc(h), OperatorDesc::ReduceSink(_)) {
                self.arena.clear_children(h);
            }
        }

        let mut graph = ctx.graph;
        if let Some(fetch) = fetch_task {
            let id = graph.add_task(TaskWork::Fetch(fetch));
            graph.fetch_task = Some(id);
        }
        Ok(graph.compact())
    }

    /// Pre-order walk maintaining the operator stack; children of a
    /// reduce sink whose subtree was already dispatched are not walked
    /// again (several sinks share one join reducer).
    fn walk_mr(
        &mut self,
        op: OpHandle,
        stack: &mut Vec<OpHandle>,
        dispatched: &mut HashSet<OpHandle>,
        ctx: &mut GenMrCtx,
    ) -> Result<()> {
        stack.push(op);
        self.dispatch_mr(op, stack, ctx)?;
        dispatched.insert(op);

        let children = self.arena.children(op).to_vec();
        let skip = matches!(self.arena.desc(op), OperatorDesc::ReduceSink(_))
            && children.iter().all(|c| dispatched.contains(c));
        if !skip {
            for child in children {
                self.walk_mr(child, stack, dispatched, ctx)?;
            }
        }
        stack.pop();
        Ok(())
    }

    fn dispatch_mr(
        &mut self,
        op: OpHandle,
        stack: &[OpHandle],
        ctx: &mut GenMrCtx,
    ) -> Result<()> {
        let names: Vec<&str> = stack.iter().map(|h| self.arena.name(*h)).collect();
        let stack_str = stack_string(names);
        match dispatch(mr_rules(), &stack_str).map(|i| mr_rules()[i].name()) {
            Some("R1") => self.mr_table_scan(op, ctx),
            Some("R2") => self.mr_red_sink1(op, stack, ctx),
            Some("R3") => self.mr_red_sink2(op, stack, ctx),
            Some("R4") => self.mr_file_sink(op, stack, ctx),
            _ => {
                // propagate the current context downward
                if stack.len() >= 2 {
                    let parent = stack[stack.len() - 2];
                    if let Some(cur) = ctx.map_curr_ctx.get(&parent).cloned() {
                        ctx.map_curr_ctx.insert(op, cur);
                    }
                }
                Ok(())
            }
        }
    }

    /// R1: a table scan starts a new map task.
    fn mr_table_scan(&mut self, op: OpHandle, ctx: &mut GenMrCtx) -> Result<()> {
        let alias = match self.arena.desc(op) {
            OperatorDesc::TableScan(ts) => ts.alias.clone(),
            _ => unreachable!("R1 fires on table scans"),
        };
        let task = ctx.graph.add_task(TaskWork::MapRed(MapRedWork::default()));
        ctx.map_curr_ctx.insert(op, (task, op, alias));
        Ok(())
    }

    /// R2: a reduce sink below a table scan closes the map side; its
    /// child subtree becomes the task's reducer. When the reducer already
    /// belongs to a task (a merged join), this scan's map work joins that
    /// task instead.
    fn mr_red_sink1(&mut self, op: OpHandle, stack: &[OpHandle], ctx: &mut GenMrCtx) -> Result<()> {
        let parent = stack[stack.len() - 2];
        let (curr_task, curr_top, curr_alias) = ctx
            .map_curr_ctx
            .get(&parent)
            .cloned()
            .ok_or_else(|| ErrorKind::Generic.with("reduce sink outside a map context"))?;
        let reducer = *self
            .arena
            .children(op)
            .first()
            .ok_or_else(|| ErrorKind::Generic.with("reduce sink without a reducer"))?;

        let task = match ctx.op_task_map.get(&reducer) {
            Some(existing) => *existing,
            None => {
                let num_reducers = match self.arena.desc(op) {
                    OperatorDesc::ReduceSink(rs) => rs.num_reducers,
                    _ => None,
                };
                if let TaskWork::MapRed(work) = ctx.graph.work_mut(curr_task) {
                    work.reducer = Some(reducer);
                    work.num_reduce_tasks = num_reducers;
                }
                ctx.op_task_map.insert(reducer, curr_task);
                curr_task
            }
        };
        if !ctx.seen_tops.contains(&curr_top) {
            self.set_task_plan(&curr_alias, curr_top, task, ctx)?;
            ctx.seen_tops.insert(curr_top);
        }
        ctx.map_curr_ctx.insert(op, (task, curr_top, curr_alias));
        Ok(())
    }

    /// R3: a reduce sink inside a reducer chain ends the current task;
    /// the next stage re-shuffles the intermediate output.
    fn mr_red_sink2(&mut self, op: OpHandle, stack: &[OpHandle], ctx: &mut GenMrCtx) -> Result<()> {
        let parent = stack[stack.len() - 2];
        let (curr_task, curr_top, curr_alias) = ctx
            .map_curr_ctx
            .get(&parent)
            .cloned()
            .ok_or_else(|| ErrorKind::Generic.with("reduce sink outside a map context"))?;
        let reducer = *self
            .arena
            .children(op)
            .first()
            .ok_or_else(|| ErrorKind::Generic.with("reduce sink without a reducer"))?;

        let task = match ctx.op_task_map.get(&reducer) {
            Some(existing) => {
                let existing = *existing;
                ctx.graph.add_dependency(curr_task, existing);
                existing
            }
            None => {
                let tmp_dir = self.ctx.make_scratch_path("mr");
                let num_reducers = match self.arena.desc(op) {
                    OperatorDesc::ReduceSink(rs) => rs.num_reducers,
                    _ => None,
                };
                let mut work = MapRedWork::default();
                work.path_to_aliases
                    .insert(tmp_dir.clone(), vec![tmp_dir.clone()]);
                // the map side of the next stage is the re-shuffle itself
                work.alias_to_work.insert(tmp_dir.clone(), op);
                work.reducer = Some(reducer);
                work.num_reduce_tasks = num_reducers;
                let next = ctx.graph.add_task(TaskWork::MapRed(work));
                ctx.graph.add_dependency(curr_task, next);
                ctx.op_task_map.insert(reducer, next);
                next
            }
        };
        ctx.map_curr_ctx.insert(op, (task, curr_top, curr_alias));
        Ok(())
    }

    /// R4: a file sink terminates the task; the global move step waits
    /// for it.
    fn mr_file_sink(&mut self, op: OpHandle, stack: &[OpHandle], ctx: &mut GenMrCtx) -> Result<()> {
        let parent = stack[stack.len() - 2];
        let (curr_task, curr_top, curr_alias) = ctx
            .map_curr_ctx
            .get(&parent)
            .cloned()
            .ok_or_else(|| ErrorKind::Generic.with("file sink outside a map context"))?;
        if !ctx.seen_tops.contains(&curr_top) {
            // map-only task: attach the scan's input spec now
            self.set_task_plan(&curr_alias, curr_top, curr_task, ctx)?;
            ctx.seen_tops.insert(curr_top);
        }
        if let Some(mv) = ctx.mv_task {
            ctx.graph.add_dependency(curr_task, mv);
        }
        ctx.map_curr_ctx
            .insert(op, (curr_task, curr_top, curr_alias));
        Ok(())
    }

    /// Attach one alias's scan to a task's map side: input paths from the
    /// partition pruner (confirmed plus unknown), narrowed by the sample
    /// pruner.
    fn set_task_plan(
        &mut self,
        alias_id: &str,
        top_op: OpHandle,
        task: TaskId,
        ctx: &mut GenMrCtx,
    ) -> Result<()> {
        let mut inputs: Vec<(String, Option<PartitionDesc>)> = Vec::new();

        if let Some(pruner) = self.alias_to_pruner.get(alias_id) {
            let table = pruner.table().clone();
            let table_info = TableDesc::of_table(&table);
            let partitions = if table.is_partitioned() {
                let pruned = pruner.prune(self.metastore)?;
                let mut parts = pruned.confirmed;
                parts.extend(pruned.unknown);
                parts
            } else {
                vec![table.pseudo_partition()]
            };
            let sample_pruner = self.alias_to_sample_pruner.get(alias_id);
            for partition in partitions {
                let part_desc = PartitionDesc {
                    partition_spec: partition.spec.clone(),
                    table_info: table_info.clone(),
                };
                let paths = match sample_pruner {
                    Some(sp) => sp.prune(&table, &partition)?,
                    None => vec![partition.location.clone()],
                };
                for path in paths {
                    inputs.push((path, Some(part_desc.clone())));
                }
            }
        } else {
            return Err(ErrorKind::Generic.with(format!("no pruner for alias {alias_id}")));
        }

        if let TaskWork::MapRed(work) = ctx.graph.work_mut(task) {
            for (path, part) in inputs {
                work.path_to_aliases
                    .entry(path.clone())
                    .or_default()
                    .push(alias_id.to_string());
                if let Some(part) = part {
                    work.path_to_partition_info.insert(path, part);
                }
            }
            work.alias_to_work.insert(alias_id.to_string(), top_op);
        }
        Ok(())
    }

    /// The fetch fast path: `SELECT *` over one table, no re-sorting, and
    /// an input set fully decided at compile time.
    fn try_fetch_fast_path(&mut self, qb: &QB) -> Result<Option<FetchWork>> {
        if !qb.is_select_star_query()
            || qb.parse_info().has_any_cluster_by()
            || qb.parse_info().has_any_distribute_by()
            || qb.parse_info().has_any_sort_by()
        {
            return Ok(None);
        }
        // a sampled scan must go through input selection in a real job
        if qb
            .tab_aliases()
            .any(|a| qb.parse_info().table_sample(a).is_some())
        {
            return Ok(None);
        }
        let table = match qb.metadata().alias_to_table().values().next() {
            Some(t) => t.clone(),
            None => return Ok(None),
        };
        let limit = qb.parse_info().outer_query_limit();

        if !table.is_partitioned() {
            if qb.parse_info().has_any_where() {
                return Ok(None);
            }
            return Ok(Some(FetchWork {
                source_paths: vec![table.location.clone()],
                partition_info: Vec::new(),
                table_info: TableDesc::of_table(&table),
                limit,
            }));
        }

        if self.alias_to_pruner.len() != 1 {
            return Ok(None);
        }
        let pruner = self.alias_to_pruner.values().next().expect("one pruner");
        if !pruner.contains_partition_cols() {
            return Ok(None);
        }
        let pruned = pruner.prune(self.metastore)?;
        // any unknown partition needs the filter to run as a real job
        if pruned.has_unknown() {
            return Ok(None);
        }
        let table_info = TableDesc::of_table(&table);
        let mut source_paths = Vec::new();
        let mut partition_info = Vec::new();
        for partition in pruned.confirmed {
            source_paths.push(partition.location.clone());
            partition_info.push(PartitionDesc {
                partition_spec: partition.spec.clone(),
                table_info: table_info.clone(),
            });
        }
        Ok(Some(FetchWork {
            source_paths,
            partition_info,
            table_info,
            limit,
        }))
    }
}
