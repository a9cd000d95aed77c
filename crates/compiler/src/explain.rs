//! Human-readable rendering of compiled plans, for EXPLAIN-style
//! inspection and plan-shape assertions in tests.

use crate::mapred::{TaskGraph, TaskWork};
use crate::ops::{OpHandle, OperatorArena, OperatorDesc};
use crate::plan::descs::RsPartitioning;

/// Render the task dependency graph with each task's operator trees.
pub fn explain_tasks(graph: &TaskGraph, arena: &OperatorArena) -> String {
    let mut out = String::new();
    for task in &graph.tasks {
        out.push_str(&format!("Task {}", task.id));
        if !task.parents.is_empty() {
            let parents: Vec<String> =
                task.parents.iter().map(|p| p.to_string()).collect();
            out.push_str(&format!(" <- [{}]", parents.join(", ")));
        }
        out.push('\n');
        match &task.work {
            TaskWork::MapRed(work) => {
                for (alias, op) in &work.alias_to_work {
                    out.push_str(&format!("  map side ({alias}):\n"));
                    fmt_op_tree(arena, *op, 2, &mut out);
                }
                for (path, aliases) in &work.path_to_aliases {
                    out.push_str(&format!("  input {path} -> {}\n", aliases.join(", ")));
                }
                if let Some(reducer) = work.reducer {
                    out.push_str("  reduce side:\n");
                    fmt_op_tree(arena, reducer, 2, &mut out);
                }
                if let Some(n) = work.num_reduce_tasks {
                    out.push_str(&format!("  reducers: {n}\n"));
                }
            }
            TaskWork::Move(work) => {
                for load in &work.load_table_work {
                    out.push_str(&format!(
                        "  move {} -> table {}\n",
                        load.source_dir,
                        load.table_info.table_name.as_deref().unwrap_or("?"),
                    ));
                }
                for load in &work.load_file_work {
                    out.push_str(&format!(
                        "  move {} -> {}\n",
                        load.source_dir, load.target_dir
                    ));
                }
            }
            TaskWork::Fetch(work) => {
                for path in &work.source_paths {
                    out.push_str(&format!("  fetch {path}\n"));
                }
                if let Some(limit) = work.limit {
                    out.push_str(&format!("  limit {limit}\n"));
                }
            }
        }
    }
    out
}

/// Render one operator subtree.
pub fn explain_operator_tree(arena: &OperatorArena, root: OpHandle) -> String {
    let mut out = String::new();
    fmt_op_tree(arena, root, 0, &mut out);
    out
}

fn fmt_op_tree(arena: &OperatorArena, op: OpHandle, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    out.push_str(&format!("{pad}{}\n", fmt_op(arena.desc(op))));
    for child in arena.children(op) {
        fmt_op_tree(arena, *child, indent + 1, out);
    }
}

fn fmt_op(desc: &OperatorDesc) -> String {
    match desc {
        OperatorDesc::TableScan(ts) => format!("TS[{}]", ts.alias),
        OperatorDesc::Filter(f) => format!("FIL[{}]", f.predicate),
        OperatorDesc::Select(s) => {
            if s.select_star {
                "SEL[*]".to_string()
            } else {
                let cols: Vec<String> =
                    s.col_list.iter().map(|c| c.to_string()).collect();
                format!("SEL[{}]", cols.join(", "))
            }
        }
        OperatorDesc::GroupBy(g) => {
            format!("GBY[{:?} keys={} aggs={}]", g.mode, g.keys.len(), g.aggregators.len())
        }
        OperatorDesc::ReduceSink(rs) => {
            let part = match &rs.partitioning {
                RsPartitioning::Random => "random".to_string(),
                RsPartitioning::KeyPrefix(n) => format!("key[0..{n}]"),
                RsPartitioning::Cols(cols) => format!("cols[{}]", cols.len()),
            };
            format!(
                "RS[keys={} values={} tag={} partition={part} order={}]",
                rs.key_cols.len(),
                rs.value_cols.len(),
                rs.tag,
                rs.effective_order(),
            )
        }
        OperatorDesc::Join(j) => format!("JOIN[inputs={}]", j.exprs.len()),
        OperatorDesc::FileSink(fs) => format!("FS[{}]", fs.dir_name),
        OperatorDesc::Limit(l) => format!("LIM[{}]", l.limit),
        OperatorDesc::Forward(_) => "FOR".to_string(),
        OperatorDesc::Script(s) => format!("SCR[{}]", s.cmd),
        OperatorDesc::Extract(e) => format!("EX[{}]", e.col),
    }
}
