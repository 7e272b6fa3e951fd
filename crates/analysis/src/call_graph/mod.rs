//! Call graph of a module.
//!
//! Edges are collected from call instructions whose target names a function
//! directly. Indirect targets are expected to be lowered before the graph is
//! built, so they contribute no edge. Conditional targets only contribute
//! their branches when [`CallGraphOptions::include_conditional_targets`] is
//! set.

mod scc;
pub mod writer;

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use lattix_ir::{Body, FuncRef, InstId, Module};
use petgraph::graph::{Graph, NodeIndex};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

pub use scc::{CallGraphSccs, SccBuilder, SccInfo, SccRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallGraphOptions {
    /// Keep every call instruction that induces an edge.
    pub collect_callsites: bool,

    /// Add an edge to every function a conditional target may designate.
    pub include_conditional_targets: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallGraph {
    nodes: BTreeMap<FuncRef, Node>,
    callsites: Option<BTreeMap<(FuncRef, FuncRef), BTreeSet<InstId>>>,
}

impl CallGraph {
    pub fn new(options: CallGraphOptions) -> Self {
        Self {
            nodes: BTreeMap::new(),
            callsites: options.collect_callsites.then(BTreeMap::new),
        }
    }

    /// Builds a call graph from every function of a module.
    pub fn build(module: &Module, options: CallGraphOptions) -> Self {
        let funcs: Vec<_> = module.iter_functions().collect();
        let d_calls = DashMap::new();
        funcs.par_iter().for_each(|&func_ref| {
            if let Some(body) = module.body(func_ref) {
                d_calls.insert(func_ref, calls(body, options));
            }
        });

        let mut graph = Self::new(options);
        for func_ref in funcs {
            graph.add_node(func_ref);
            if let Some((_, calls)) = d_calls.remove(&func_ref) {
                for (callee, inst) in calls {
                    graph.add_edge_with_callsite(func_ref, callee, inst);
                }
            }
        }

        graph
    }

    /// Builds a call graph that only contains the functions reachable from
    /// `root`.
    pub fn build_from_root(module: &Module, root: FuncRef, options: CallGraphOptions) -> Self {
        let mut graph = Self::new(options);
        graph.add_node(root);

        let mut visited = FxHashSet::default();
        visited.insert(root);
        let mut worklist = vec![root];
        while let Some(func_ref) = worklist.pop() {
            let Some(body) = module.body(func_ref) else {
                continue;
            };

            for (callee, inst) in calls(body, options) {
                graph.add_edge_with_callsite(func_ref, callee, inst);
                if visited.insert(callee) {
                    worklist.push(callee);
                }
            }
        }

        graph
    }

    pub fn collects_callsites(&self) -> bool {
        self.callsites.is_some()
    }

    pub fn add_node(&mut self, func_ref: FuncRef) {
        self.nodes.entry(func_ref).or_default();
    }

    pub fn add_edge(&mut self, caller: FuncRef, callee: FuncRef) {
        self.nodes.entry(caller).or_default().callees.insert(callee);
        self.nodes.entry(callee).or_default().callers.insert(caller);
    }

    /// Adds an edge and records `inst` as one of its call sites. The call site
    /// is dropped if the graph doesn't collect call sites.
    pub fn add_edge_with_callsite(&mut self, caller: FuncRef, callee: FuncRef, inst: InstId) {
        self.add_edge(caller, callee);
        if let Some(callsites) = &mut self.callsites {
            callsites.entry((caller, callee)).or_default().insert(inst);
        }
    }

    /// Returns a graph with every edge reversed. Call sites move with their
    /// edges.
    pub fn inverted(&self) -> Self {
        let mut inverted = Self {
            nodes: BTreeMap::new(),
            callsites: None,
        };
        for (&func_ref, node) in &self.nodes {
            inverted.add_node(func_ref);
            for &callee in &node.callees {
                inverted.add_edge(callee, func_ref);
            }
        }

        inverted.callsites = self.callsites.as_ref().map(|callsites| {
            callsites
                .iter()
                .map(|(&(caller, callee), sites)| ((callee, caller), sites.clone()))
                .collect()
        });
        inverted
    }

    /// Iterates over the functions of the graph in ascending order.
    pub fn funcs(&self) -> impl Iterator<Item = FuncRef> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, func_ref: FuncRef) -> bool {
        self.nodes.contains_key(&func_ref)
    }

    /// Iterates over the edges ordered by caller, then by callee.
    pub fn edges(&self) -> impl Iterator<Item = (FuncRef, FuncRef)> + '_ {
        self.nodes
            .iter()
            .flat_map(|(&caller, node)| node.callees.iter().map(move |&callee| (caller, callee)))
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.callees.len()).sum()
    }

    pub fn callsites(&self, caller: FuncRef, callee: FuncRef) -> Option<&BTreeSet<InstId>> {
        self.callsites.as_ref()?.get(&(caller, callee))
    }

    /// Get the callees of a function.
    pub fn callees(&self, func_ref: FuncRef) -> impl Iterator<Item = FuncRef> + '_ {
        self.nodes
            .get(&func_ref)
            .into_iter()
            .flat_map(|node| node.callees.iter().copied())
    }

    /// Get the callers of a function.
    pub fn callers(&self, func_ref: FuncRef) -> impl Iterator<Item = FuncRef> + '_ {
        self.nodes
            .get(&func_ref)
            .into_iter()
            .flat_map(|node| node.callers.iter().copied())
    }

    /// Returns `true` if the function calls nothing.
    pub fn is_leaf(&self, func_ref: FuncRef) -> bool {
        self.callees(func_ref).next().is_none()
    }

    /// Functions transitively called by `func_ref`, `func_ref` included.
    pub fn reachable_functions(&self, func_ref: FuncRef) -> BTreeSet<FuncRef> {
        self.transitive_closure(func_ref, |node| &node.callees)
    }

    /// Functions transitively calling `func_ref`, `func_ref` included.
    pub fn reaching_functions(&self, func_ref: FuncRef) -> BTreeSet<FuncRef> {
        self.transitive_closure(func_ref, |node| &node.callers)
    }

    pub fn exists_direct_call(&self, caller: FuncRef, callee: FuncRef) -> bool {
        self.nodes
            .get(&caller)
            .is_some_and(|node| node.callees.contains(&callee))
    }

    /// Returns `true` if a call path leads from `caller` to `callee`.
    ///
    /// Functions in `ignore` are never entered, and `callee` is treated as
    /// unreachable once it is in `ignore`. The functions visited by the search
    /// are added to `ignore`.
    pub fn exists_direct_or_indirect_call(
        &self,
        caller: FuncRef,
        callee: FuncRef,
        ignore: &mut FxHashSet<FuncRef>,
    ) -> bool {
        if ignore.contains(&callee) {
            return false;
        }
        ignore.insert(caller);

        if self.exists_direct_call(caller, callee) {
            ignore.insert(callee);
            return true;
        }

        for next in self.callees(caller) {
            if !ignore.contains(&next) && self.exists_direct_or_indirect_call(next, callee, ignore)
            {
                return true;
            }
        }

        false
    }

    /// Collects the functions below `func_ref` that call nothing.
    pub fn find_leaves_below_function(&self, func_ref: FuncRef) -> BTreeSet<FuncRef> {
        let mut leaves = BTreeSet::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![func_ref];

        while let Some(func_ref) = stack.pop() {
            if !visited.insert(func_ref) {
                continue;
            }

            if self.is_leaf(func_ref) {
                leaves.insert(func_ref);
            }
            stack.extend(self.callees(func_ref).filter(|f| !visited.contains(f)));
        }

        leaves
    }

    /// Returns the functions where the call trees of all `funcs` first meet.
    ///
    /// A function is a nearest common callee if every function of `funcs`
    /// transitively calls it, and it is either a leaf or none of its callees is
    /// called by every function of `funcs`. A singleton `funcs` is its own
    /// nearest common callee.
    pub fn find_nearest_common_callees(&self, funcs: &BTreeSet<FuncRef>) -> BTreeSet<FuncRef> {
        if funcs.len() == 1 {
            return funcs.clone();
        }

        let mut counts: FxHashMap<FuncRef, usize> = FxHashMap::default();
        for &func_ref in funcs {
            for callee in self.reachable_functions(func_ref) {
                *counts.entry(callee).or_default() += 1;
            }
        }

        let is_common = |func_ref: FuncRef| counts.get(&func_ref) == Some(&funcs.len());
        counts
            .keys()
            .copied()
            .filter(|&func_ref| is_common(func_ref))
            .filter(|&func_ref| {
                self.is_leaf(func_ref) || !self.callees(func_ref).any(is_common)
            })
            .collect()
    }

    /// Returns all functions ordered so that callees come before their callers.
    /// Functions in the same strongly connected component keep their
    /// ascending order.
    pub fn inverse_topological_order(&self) -> Vec<FuncRef> {
        let sccs = self.sccs();
        let mut order: Vec<_> = self.funcs().collect();
        order.sort_by_key(|&func_ref| sccs.scc_ref(func_ref));
        order
    }

    pub fn sccs(&self) -> CallGraphSccs {
        SccBuilder::new().compute_scc(self)
    }

    /// Exports the graph for use with generic graph algorithms.
    pub fn directed_graph(&self) -> DirectedCallGraph {
        let mut graph = Graph::new();
        let mut index = FxHashMap::default();
        for func_ref in self.funcs() {
            index.insert(func_ref, graph.add_node(func_ref));
        }

        for (caller, callee) in self.edges() {
            let callsites = self.callsites(caller, callee).cloned().unwrap_or_default();
            graph.add_edge(index[&caller], index[&callee], CallEdge { callsites });
        }

        DirectedCallGraph { graph, index }
    }

    fn transitive_closure(
        &self,
        func_ref: FuncRef,
        next: impl Fn(&Node) -> &BTreeSet<FuncRef>,
    ) -> BTreeSet<FuncRef> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![func_ref];
        while let Some(func_ref) = stack.pop() {
            if !visited.insert(func_ref) {
                continue;
            }
            if let Some(node) = self.nodes.get(&func_ref) {
                stack.extend(next(node).iter().filter(|f| !visited.contains(*f)));
            }
        }

        visited
    }
}

/// A deduplicated view of a [`CallGraph`] backed by `petgraph`.
#[derive(Debug, Clone)]
pub struct DirectedCallGraph {
    pub graph: Graph<FuncRef, CallEdge>,
    pub index: FxHashMap<FuncRef, NodeIndex>,
}

impl DirectedCallGraph {
    pub fn node_index(&self, func_ref: FuncRef) -> Option<NodeIndex> {
        self.index.get(&func_ref).copied()
    }

    pub fn func_of(&self, index: NodeIndex) -> FuncRef {
        self.graph[index]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallEdge {
    /// Empty unless call sites are collected.
    pub callsites: BTreeSet<InstId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    callees: BTreeSet<FuncRef>,
    callers: BTreeSet<FuncRef>,
}

fn calls(body: &Body, options: CallGraphOptions) -> Vec<(FuncRef, InstId)> {
    let mut calls = Vec::new();
    for inst in body.insts() {
        let Some(target) = body.call_target(inst) else {
            continue;
        };

        if options.include_conditional_targets {
            calls.extend(target.callees().into_iter().map(|callee| (callee, inst)));
        } else if let Some(callee) = target.direct_callee() {
            calls.push((callee, inst));
        }
    }
    calls
}
