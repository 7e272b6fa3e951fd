use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use lattix_ir::FuncRef;
use rustc_hash::FxHashSet;

use super::CallGraph;

/// Represents the strongly connected components of a call graph.
///
/// SCCs are numbered in the order Tarjan's algorithm completes them, so the
/// SCC of a callee never has a larger [`SccRef`] than the SCC of its caller.
#[derive(Debug, Clone)]
pub struct CallGraphSccs {
    scc_map: SecondaryMap<FuncRef, SccRef>,
    scc_store: PrimaryMap<SccRef, SccInfo>,
}

impl CallGraphSccs {
    pub fn scc_of(&self, func_ref: FuncRef) -> &SccInfo {
        let scc_ref = self.scc_ref(func_ref);
        self.scc_info(scc_ref)
    }

    pub fn scc_ref(&self, func_ref: FuncRef) -> SccRef {
        self.scc_map[func_ref]
    }

    pub fn scc_info(&self, scc_ref: SccRef) -> &SccInfo {
        &self.scc_store[scc_ref]
    }

    /// Iterates over SCCs from the leaves of the call graph upwards.
    pub fn iter(&self) -> impl Iterator<Item = (SccRef, &SccInfo)> {
        self.scc_store.iter()
    }

    pub fn len(&self) -> usize {
        self.scc_store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scc_store.is_empty()
    }

    /// Returns `true` if the function is part of a recursive cycle.
    pub fn is_recursive(&self, func_ref: FuncRef) -> bool {
        self.scc_of(func_ref).is_cycle
    }

    /// Groups SCCs into levels. An SCC only calls into SCCs of lower levels,
    /// so the SCCs of one level never call each other.
    pub fn levels(&self, call_graph: &CallGraph) -> Vec<Vec<SccRef>> {
        let mut level_of: SecondaryMap<SccRef, usize> = SecondaryMap::new();
        let mut levels: Vec<Vec<SccRef>> = Vec::new();

        // Callee SCCs always precede their callers, so one pass suffices.
        for (scc_ref, info) in self.scc_store.iter() {
            let level = info
                .components
                .iter()
                .flat_map(|&func_ref| call_graph.callees(func_ref))
                .map(|callee| self.scc_ref(callee))
                .filter(|&callee_scc| callee_scc != scc_ref)
                .map(|callee_scc| level_of[callee_scc] + 1)
                .max()
                .unwrap_or(0);

            level_of[scc_ref] = level;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(scc_ref);
        }

        levels
    }
}

/// A strongly connected component of a call graph.
#[derive(Debug, Clone)]
pub struct SccInfo {
    /// More than one function, or a single function calling itself.
    pub is_cycle: bool,

    pub components: FxHashSet<FuncRef>,
}

impl SccInfo {
    /// Returns the components in ascending order.
    pub fn sorted_components(&self) -> Vec<FuncRef> {
        let mut components: Vec<_> = self.components.iter().copied().collect();
        components.sort_unstable();
        components
    }
}

/// Tarjan's algorithm over the callee edges of a call graph.
#[derive(Debug, Default)]
pub struct SccBuilder {
    scc_map: SecondaryMap<FuncRef, SccRef>,
    scc_store: PrimaryMap<SccRef, SccInfo>,
    stack: Vec<FuncRef>,
    visits: SecondaryMap<FuncRef, Option<Visit>>,
    next_index: usize,
}

impl SccBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_scc(mut self, call_graph: &CallGraph) -> CallGraphSccs {
        for func_ref in call_graph.funcs() {
            if self.visits[func_ref].is_none() {
                self.visit(func_ref, call_graph);
            }
        }

        CallGraphSccs {
            scc_map: self.scc_map,
            scc_store: self.scc_store,
        }
    }

    /// Visits `func_ref` and its unvisited callees. Returns the lowest index
    /// reachable from `func_ref` through functions still on the stack.
    fn visit(&mut self, func_ref: FuncRef, call_graph: &CallGraph) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.visits[func_ref] = Some(Visit {
            index,
            on_stack: true,
        });
        self.stack.push(func_ref);

        let mut lowlink = index;
        for callee in call_graph.callees(func_ref) {
            let visit = self.visits[callee];
            let reached = match visit {
                None => self.visit(callee, call_graph),
                Some(Visit {
                    index,
                    on_stack: true,
                }) => index,
                Some(_) => continue,
            };
            lowlink = lowlink.min(reached);
        }

        if lowlink == index {
            self.pop_component(func_ref, call_graph);
        }
        lowlink
    }

    /// Pops the functions down to `root` off the stack as a new SCC.
    fn pop_component(&mut self, root: FuncRef, call_graph: &CallGraph) {
        let mut components = FxHashSet::default();
        while let Some(func_ref) = self.stack.pop() {
            if let Some(visit) = &mut self.visits[func_ref] {
                visit.on_stack = false;
            }
            components.insert(func_ref);
            if func_ref == root {
                break;
            }
        }

        let is_cycle = components.len() > 1 || call_graph.exists_direct_call(root, root);
        let scc_ref = self.scc_store.next_key();
        for &func_ref in &components {
            self.scc_map[func_ref] = scc_ref;
        }
        self.scc_store.push(SccInfo {
            is_cycle,
            components,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SccRef(u32);
entity_impl!(SccRef);

#[derive(Debug, Clone, Copy)]
struct Visit {
    index: usize,
    on_stack: bool,
}
