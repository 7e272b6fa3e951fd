//! The summarizing fixpoint engine.
//!
//! Every function with a body is analyzed at most once. The state at its
//! `EndFunction` instruction is condensed into a summary, and calls to the
//! function apply that summary instead of revisiting the callee.

mod call;
pub mod parallel;
pub mod store;
pub mod summary_db;

use std::{collections::BTreeSet, io, sync::Arc};

use cranelift_entity::SecondaryMap;
use lattix_ir::{ir_writer::FuncWriter, Body, FuncRef, InstId, Module};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, debug_span, trace};

use crate::{
    call_graph::{CallGraph, CallGraphOptions},
    domain::{AnalysisCtx, Domain, ProgramPoint},
    AnalysisError, Result,
};

pub use parallel::ParallelDriver;
pub use store::SummaryStore;
pub use summary_db::{SharedSummaryDb, Slot, SummaryDb};

/// Call graph whose edges cover every function a call may reach, conditional
/// targets included. Callees come before their callers in its orders.
pub(crate) const DEPENDENCY_GRAPH: CallGraphOptions = CallGraphOptions {
    collect_callsites: false,
    include_conditional_targets: true,
};

/// The order in which the module driver picks functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalysisOrder {
    /// Functions in the order they're declared in the module.
    #[default]
    Declaration,

    /// Callees before callers, see [`CallGraph::inverse_topological_order`].
    InverseTopological,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub order: AnalysisOrder,

    /// Keep the per-instruction states of a function once it is summarized.
    pub retain_states: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order: AnalysisOrder::Declaration,
            retain_states: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncStatus {
    NotStarted,
    InProgress,
    Summarized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    /// Fixpoint computations, i.e. summaries computed.
    pub fixpoints: usize,
    /// Instructions popped from the worklists.
    pub visits: usize,
    pub summaries_applied: usize,
    pub opaque_calls: usize,
    /// Calls ignored because the callee was already being summarized.
    pub recursion_cutoffs: usize,
}

/// Whether calls are followed into their callees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Intraprocedural,
    Interprocedural,
}

pub struct LocalAnalyzer<'a, D: Domain> {
    module: &'a Module,
    env: D::Env,
    pub config: EngineConfig,

    summaries: SummaryDb<D::Summary>,
    /// Functions whose summary is being computed.
    recursion_guard: FxHashSet<FuncRef>,
    states: FxHashMap<FuncRef, SecondaryMap<InstId, D>>,
    stats: AnalysisStats,
}

impl<'a, D: Domain> LocalAnalyzer<'a, D> {
    pub fn new(module: &'a Module) -> Self {
        Self::with_env(module, D::Env::default())
    }

    pub fn with_env(module: &'a Module, env: D::Env) -> Self {
        Self {
            module,
            env,
            config: EngineConfig::default(),
            summaries: SummaryDb::new(),
            recursion_guard: FxHashSet::default(),
            states: FxHashMap::default(),
            stats: AnalysisStats::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    pub fn env(&self) -> &D::Env {
        &self.env
    }

    pub fn into_env(self) -> D::Env {
        self.env
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    pub fn summaries(&self) -> &SummaryDb<D::Summary> {
        &self.summaries
    }

    pub fn summary(&self, func: FuncRef) -> Option<&D::Summary> {
        self.summaries.get(func).map(|summary| &**summary)
    }

    /// Makes a summary computed elsewhere available to calls. Returns `false`
    /// if `func` already has a summary.
    pub fn import_summary(&mut self, func: FuncRef, summary: Arc<D::Summary>) -> bool {
        self.summaries.insert(func, summary)
    }

    pub fn status(&self, func: FuncRef) -> FuncStatus {
        if self.summaries.contains(func) {
            FuncStatus::Summarized
        } else if self.recursion_guard.contains(&func) {
            FuncStatus::InProgress
        } else {
            FuncStatus::NotStarted
        }
    }

    /// Returns the state at `point`. States of summarized functions are only
    /// available with [`EngineConfig::retain_states`].
    pub fn state_at(&self, point: ProgramPoint) -> Option<&D> {
        self.states.get(&point.func).map(|states| &states[point.inst])
    }

    /// Analyzes the body of `func` without following calls. Every call is
    /// treated as an opaque operation.
    pub fn analyze_body(&mut self, func: FuncRef) -> Result<bool> {
        self.analyze_root(func, Mode::Intraprocedural)
    }

    /// Analyzes `func` and, through their call sites, every function it
    /// transitively calls.
    pub fn analyze_function(&mut self, func: FuncRef) -> Result<bool> {
        self.analyze_root(func, Mode::Interprocedural)
    }

    /// Analyzes every function of the module that has a body. The module's
    /// entry point, if any, goes first so that the functions it reaches are
    /// seeded from their call sites.
    pub fn analyze_module(&mut self) -> Result<bool> {
        let mut funcs: Vec<_> = match self.config.order {
            AnalysisOrder::Declaration => self.module.iter_functions().collect(),
            AnalysisOrder::InverseTopological => {
                CallGraph::build(self.module, DEPENDENCY_GRAPH).inverse_topological_order()
            }
        };
        if let Some(entry) = self.module.entry {
            funcs.retain(|&func| func != entry);
            funcs.insert(0, entry);
        }
        debug!(
            funcs = funcs.len(),
            order = ?self.config.order,
            entry = ?self.module.entry,
            "analyzing module"
        );

        let mut new_data = false;
        for func in funcs {
            let function = self
                .module
                .get_func(func)
                .ok_or(AnalysisError::UnknownFunction(func))?;
            if function.body_available() {
                new_data |= self.analyze_function(func)?;
            }
        }

        Ok(new_data)
    }

    /// Writes the retained states of every function, instruction by
    /// instruction.
    pub fn output(&self, mut w: impl io::Write) -> io::Result<()> {
        for func in self.module.iter_functions() {
            let Some(states) = self.states.get(&func) else {
                continue;
            };
            let Some(body) = self.module.body(func) else {
                continue;
            };

            writeln!(w, "////")?;
            writeln!(w, "//// Function: {}", self.module.func_name(func))?;
            writeln!(w, "////")?;
            writeln!(w)?;

            let writer = FuncWriter::new(self.module, func);
            for inst in body.insts() {
                let mut state = String::new();
                states[inst]
                    .fmt_state(self.module, &self.env, &mut state)
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to format state"))?;

                writeln!(w, "**** {}", inst.as_u32())?;
                writeln!(w, "{}", state.trim_end())?;
                writeln!(w, "{}", writer.inst_string(inst)?)?;
                writeln!(w)?;
            }
        }

        Ok(())
    }

    pub fn dump_string(&self) -> io::Result<String> {
        let mut s = Vec::new();
        self.output(&mut s)?;
        String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn analyze_root(&mut self, func: FuncRef, mode: Mode) -> Result<bool> {
        let module = self.module;
        let function = module
            .get_func(func)
            .ok_or(AnalysisError::UnknownFunction(func))?;
        if self.summaries.contains(func) {
            return Ok(false);
        }
        let entry = function
            .body()
            .and_then(Body::first)
            .ok_or_else(|| AnalysisError::EmptyBody(function.name().to_string()))?;

        let mut cx = AnalysisCtx::new(module, &mut self.env);
        let entry_state = D::entry(&mut cx, ProgramPoint::new(func, entry));
        let states = self.init_states(func);
        states[entry] = entry_state;

        self.recursion_guard.insert(func);
        let result = self.fixpoint(func, mode);
        self.recursion_guard.remove(&func);
        result
    }

    /// Sets every state of `func` to bottom.
    fn init_states(&mut self, func: FuncRef) -> &mut SecondaryMap<InstId, D> {
        self.states
            .entry(func)
            .or_insert_with(|| SecondaryMap::with_default(D::bottom()))
    }

    /// Runs the worklist algorithm over `func` and records its summary.
    /// Returns `true` if any state has changed.
    fn fixpoint(&mut self, func: FuncRef, mode: Mode) -> Result<bool> {
        if self.summaries.contains(func) {
            return Ok(false);
        }

        let module = self.module;
        let name = module.func_name(func);
        let body = module
            .body(func)
            .filter(|body| !body.is_empty())
            .ok_or_else(|| AnalysisError::EmptyBody(name.to_string()))?;
        let end = body
            .end_function()
            .ok_or_else(|| AnalysisError::MissingEndFunction(name.to_string()))?;

        let _span = debug_span!("summarize", func = %name).entered();
        debug!("computing summary");
        self.stats.fixpoints += 1;
        self.init_states(func);

        // Every instruction is visited at least once, lowest location first.
        let mut worklist: BTreeSet<InstId> = body.insts().collect();
        let mut new_data = false;

        while let Some(inst) = worklist.pop_first() {
            self.stats.visits += 1;
            new_data |= self.visit(func, body, inst, mode, &mut worklist)?;
        }

        let mut cx = AnalysisCtx::new(module, &mut self.env);
        let summary = self.states[&func][end].summarize(&mut cx, ProgramPoint::new(func, end))?;
        self.summaries.insert(func, Arc::new(summary));
        if !self.config.retain_states {
            self.states.remove(&func);
        }

        debug!(new_data, "summary computed");
        Ok(new_data)
    }

    /// Propagates the state of `inst` to its successors. Successors whose
    /// state changes are put back into the worklist.
    fn visit(
        &mut self,
        func: FuncRef,
        body: &Body,
        inst: InstId,
        mode: Mode,
        worklist: &mut BTreeSet<InstId>,
    ) -> Result<bool> {
        // Nothing flows out of an unreachable instruction, and a dead call
        // must not summarize its callee.
        if self.state(ProgramPoint::new(func, inst)).is_bottom() {
            return Ok(false);
        }

        let mut new_data = false;

        for succ in body.succs_of(inst) {
            let Some(to) = succ.inst() else {
                continue;
            };

            let changed = match body.call_target(inst) {
                Some(target) if mode == Mode::Interprocedural => {
                    self.do_function_call_rec(func, inst, to, target, mode)?
                }
                _ => self.step(ProgramPoint::new(func, inst), ProgramPoint::new(func, to))?,
            };

            if changed {
                trace!(from = inst.as_u32(), to = to.as_u32(), "state changed");
                new_data = true;
                worklist.insert(to);
            }
        }

        Ok(new_data)
    }

    /// Transforms the state at `from` along the edge to `to` and merges the
    /// result into the state at `to`.
    fn step(&mut self, from: ProgramPoint, to: ProgramPoint) -> Result<bool> {
        let mut new_values = self.state(from).clone();
        let mut cx = AnalysisCtx::new(self.module, &mut self.env);
        new_values.transform(&mut cx, from, to)?;
        Ok(self.merge(&new_values, from, to))
    }

    fn merge(&mut self, src: &D, from: ProgramPoint, to: ProgramPoint) -> bool {
        let states = self.init_states(to.func);
        states[to.inst].merge(src, from, to)
    }

    fn state(&mut self, point: ProgramPoint) -> &D {
        &self.init_states(point.func)[point.inst]
    }
}
