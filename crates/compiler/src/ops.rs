//! Operator arena and factory.
//!
//! Operators live in one arena as independently owned nodes addressed by
//! [`OpHandle`]; parent/child edges are handle lists, so cutting the DAG
//! at reduce sinks clears a single edge list without invalidating any
//! other handle. Each node carries its output row resolver.

use serde::{Deserialize, Serialize};

use crate::plan::descs::{
    ExtractDesc, FileSinkDesc, FilterDesc, ForwardDesc, GroupByDesc, JoinDesc, LimitDesc,
    ReduceSinkDesc, ScriptDesc, SelectDesc, TableScanDesc,
};
use crate::rowres::RowResolver;

/// Stable index of an operator inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpHandle(pub usize);

/// The typed configuration of an operator, one variant per operator kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorDesc {
    TableScan(TableScanDesc),
    Filter(FilterDesc),
    Select(SelectDesc),
    GroupBy(GroupByDesc),
    ReduceSink(ReduceSinkDesc),
    Join(JoinDesc),
    FileSink(FileSinkDesc),
    Limit(LimitDesc),
    Forward(ForwardDesc),
    Script(ScriptDesc),
    Extract(ExtractDesc),
}

impl OperatorDesc {
    /// Short operator name used by the task-planning rules and explain
    /// output.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorDesc::TableScan(_) => "TS",
            OperatorDesc::Filter(_) => "FIL",
            OperatorDesc::Select(_) => "SEL",
            OperatorDesc::GroupBy(_) => "GBY",
            OperatorDesc::ReduceSink(_) => "RS",
            OperatorDesc::Join(_) => "JOIN",
            OperatorDesc::FileSink(_) => "FS",
            OperatorDesc::Limit(_) => "LIM",
            OperatorDesc::Forward(_) => "FOR",
            OperatorDesc::Script(_) => "SCR",
            OperatorDesc::Extract(_) => "EX",
        }
    }
}

/// One operator node: descriptor, DAG edges, output row resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorNode {
    pub desc: OperatorDesc,
    pub parents: Vec<OpHandle>,
    pub children: Vec<OpHandle>,
    pub row_resolver: RowResolver,
}

/// Arena owning every operator of one compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorArena {
    nodes: Vec<OperatorNode>,
}

impl OperatorArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root operator (no parents).
    pub fn make(&mut self, desc: OperatorDesc, rr: RowResolver) -> OpHandle {
        let h = OpHandle(self.nodes.len());
        self.nodes.push(OperatorNode {
            desc,
            parents: Vec::new(),
            children: Vec::new(),
            row_resolver: rr,
        });
        h
    }

    /// Create an operator and wire it as the child of `parent`.
    pub fn make_child(&mut self, desc: OperatorDesc, rr: RowResolver, parent: OpHandle) -> OpHandle {
        self.make_child_of_all(desc, rr, &[parent])
    }

    /// Create an operator and wire it as the child of every parent, in
    /// order. Parent order is the tag order for joins.
    pub fn make_child_of_all(
        &mut self,
        desc: OperatorDesc,
        rr: RowResolver,
        parents: &[OpHandle],
    ) -> OpHandle {
        let h = self.make(desc, rr);
        for &p in parents {
            self.nodes[p.0].children.push(h);
            self.nodes[h.0].parents.push(p);
        }
        h
    }

    pub fn node(&self, h: OpHandle) -> &OperatorNode {
        &self.nodes[h.0]
    }

    pub fn node_mut(&mut self, h: OpHandle) -> &mut OperatorNode {
        &mut self.nodes[h.0]
    }

    pub fn desc(&self, h: OpHandle) -> &OperatorDesc {
        &self.nodes[h.0].desc
    }

    pub fn name(&self, h: OpHandle) -> &'static str {
        self.nodes[h.0].desc.name()
    }

    pub fn row_resolver(&self, h: OpHandle) -> &RowResolver {
        &self.nodes[h.0].row_resolver
    }

    pub fn set_row_resolver(&mut self, h: OpHandle, rr: RowResolver) {
        self.nodes[h.0].row_resolver = rr;
    }

    pub fn children(&self, h: OpHandle) -> &[OpHandle] {
        &self.nodes[h.0].children
    }

    /// Detach every child edge of `h`. Used to end map stages at reduce
    /// sinks and to re-root cached table scans.
    pub fn clear_children(&mut self, h: OpHandle) {
        self.nodes[h.0].children.clear();
    }

    /// Replace the children of `h` wholesale, fixing up the parents of
    /// the new children.
    pub fn set_children(&mut self, h: OpHandle, children: Vec<OpHandle>) {
        self.nodes[h.0].children = children.clone();
        for c in children {
            if !self.nodes[c.0].parents.contains(&h) {
                self.nodes[c.0].parents.push(h);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All handles, in creation order.
    pub fn handles(&self) -> impl Iterator<Item = OpHandle> {
        (0..self.nodes.len()).map(OpHandle)
    }
}

#[cfg(test)]
mod tests {
    use crate::plan::descs::{ForwardDesc, LimitDesc, TableScanDesc};
    use crate::rowres::RowResolver;

    use super::{OperatorArena, OperatorDesc};

    #[test]
    fn wiring_and_cutting() {
        let mut arena = OperatorArena::new();
        let ts = arena.make(
            OperatorDesc::TableScan(TableScanDesc {
                alias: "t".to_string(),
            }),
            RowResolver::new(),
        );
        let lim = arena.make_child(
            OperatorDesc::Limit(LimitDesc { limit: 5 }),
            RowResolver::new(),
            ts,
        );
        let fwd = arena.make_child(
            OperatorDesc::Forward(ForwardDesc),
            RowResolver::new(),
            lim,
        );
        assert_eq!(arena.children(ts), &[lim]);
        assert_eq!(arena.node(fwd).parents, vec![lim]);

        arena.clear_children(lim);
        assert!(arena.children(lim).is_empty());
        // The detached child keeps its handle and parents list.
        assert_eq!(arena.node(fwd).parents, vec![lim]);
    }
}
