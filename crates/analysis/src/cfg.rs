use std::collections::BTreeSet;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use lattix_ir::{Body, InstId};

/// The direction in which a graph is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Instruction level control flow graph of a body.
///
/// The sentinel successor falling off the end of the body has no node.
#[derive(Default, Debug, PartialEq, Eq)]
pub struct ControlFlowGraph {
    entry: PackedOption<InstId>,
    exit: PackedOption<InstId>,
    insts: SecondaryMap<InstId, InstNode>,
    len: usize,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, body: &Body) {
        self.insts.clear();
        self.len = body.len();

        self.entry = body.first().into();
        self.exit = body.end_function().into();

        for inst in body.insts() {
            for succ in body.succs_of(inst) {
                if let Some(succ) = succ.inst() {
                    self.add_edge(inst, succ);
                }
            }
        }
    }

    pub fn preds_of(&self, inst: InstId) -> impl Iterator<Item = &InstId> {
        self.insts[inst].preds()
    }

    pub fn succs_of(&self, inst: InstId) -> impl Iterator<Item = &InstId> {
        self.insts[inst].succs()
    }

    /// Neighbors of `inst` when the graph is walked in `direction`.
    pub fn neighbors_of(
        &self,
        inst: InstId,
        direction: Direction,
    ) -> impl Iterator<Item = &InstId> {
        match direction {
            Direction::Forward => self.insts[inst].succs(),
            Direction::Backward => self.insts[inst].preds(),
        }
    }

    pub fn pred_num_of(&self, inst: InstId) -> usize {
        self.insts[inst].preds.len()
    }

    pub fn succ_num_of(&self, inst: InstId) -> usize {
        self.insts[inst].succs.len()
    }

    /// The first instruction of the body.
    pub fn entry(&self) -> Option<InstId> {
        self.entry.expand()
    }

    /// The `EndFunction` instruction of the body.
    pub fn exit(&self) -> Option<InstId> {
        self.exit.expand()
    }

    /// The number of instructions the graph was computed from.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the instructions reachable from `root` in post order.
    pub fn post_order(&self, root: InstId, direction: Direction) -> CfgPostOrder {
        CfgPostOrder::new(self, root, direction)
    }

    pub fn add_edge(&mut self, from: InstId, to: InstId) {
        self.insts[to].preds.insert(from);
        self.insts[from].succs.insert(to);
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
struct InstNode {
    preds: BTreeSet<InstId>,
    succs: BTreeSet<InstId>,
}

impl InstNode {
    fn preds(&self) -> std::collections::btree_set::Iter<'_, InstId> {
        self.preds.iter()
    }

    fn succs(&self) -> std::collections::btree_set::Iter<'_, InstId> {
        self.succs.iter()
    }
}

pub struct CfgPostOrder<'a> {
    cfg: &'a ControlFlowGraph,
    direction: Direction,
    node_state: SecondaryMap<InstId, NodeState>,
    stack: Vec<InstId>,
}

impl<'a> CfgPostOrder<'a> {
    fn new(cfg: &'a ControlFlowGraph, root: InstId, direction: Direction) -> Self {
        Self {
            cfg,
            direction,
            node_state: SecondaryMap::default(),
            stack: vec![root],
        }
    }
}

impl Iterator for CfgPostOrder<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<InstId> {
        while let Some(&inst) = self.stack.last() {
            if self.node_state[inst].is_unvisited() {
                self.node_state[inst].set_visited();
                for &next in self.cfg.neighbors_of(inst, self.direction) {
                    if self.node_state[next].is_unvisited() {
                        self.stack.push(next);
                    }
                }
            } else {
                self.stack.pop();
                if !self.node_state[inst].has_finished() {
                    self.node_state[inst].set_finished();
                    return Some(inst);
                }
            }
        }

        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_unvisited(self) -> bool {
        self.0 == 0
    }

    fn has_finished(self) -> bool {
        self.0 == 2
    }

    fn set_visited(&mut self) {
        self.0 = 1;
    }

    fn set_finished(&mut self) {
        self.0 = 2;
    }
}
