use std::{collections::BTreeMap, sync::Arc};

use lattix_ir::{FuncRef, Module};
use rayon::prelude::*;
use tracing::debug;

use super::{EngineConfig, FuncStatus, LocalAnalyzer, SharedSummaryDb, DEPENDENCY_GRAPH};
use crate::{
    call_graph::{CallGraph, CallGraphSccs, SccRef},
    domain::Domain,
    AnalysisError, Result,
};

/// Summarizes a module on the rayon thread pool.
///
/// The strongly connected components of the call graph are processed level by
/// level, leaves first. Components of one level never call each other, so each
/// of them is summarized by its own [`LocalAnalyzer`] that sees the summaries
/// of the levels below. The call graph includes the branches of conditional
/// targets, so every function a component may call is summarized first.
pub struct ParallelDriver<'a, D: Domain> {
    module: &'a Module,
    env: D::Env,
    pub config: EngineConfig,
    call_graph: CallGraph,
    db: SharedSummaryDb<D::Summary>,
}

impl<'a, D> ParallelDriver<'a, D>
where
    D: Domain + Send,
    D::Env: Clone + Send + Sync,
{
    pub fn new(module: &'a Module) -> Self {
        Self::with_env(module, D::Env::default())
    }

    pub fn with_env(module: &'a Module, env: D::Env) -> Self {
        Self {
            module,
            env,
            config: EngineConfig::default(),
            call_graph: CallGraph::build(module, DEPENDENCY_GRAPH),
            db: SharedSummaryDb::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn status(&self, func: FuncRef) -> FuncStatus {
        self.db.status(func)
    }

    pub fn summary(&self, func: FuncRef) -> Option<Arc<D::Summary>> {
        self.db.get(func)
    }

    /// Summarizes every function with a body. Returns the number of functions
    /// summarized by this run.
    pub fn run(&self) -> Result<usize> {
        let sccs = self.call_graph.sccs();
        let levels = sccs.levels(&self.call_graph);
        debug!(
            sccs = sccs.len(),
            levels = levels.len(),
            "summarizing module in parallel"
        );

        let mut summarized = 0;
        for (depth, level) in levels.iter().enumerate() {
            let counts = level
                .par_iter()
                .map(|&scc| self.summarize_scc(&sccs, scc))
                .collect::<Result<Vec<_>>>()?;

            let level_summarized: usize = counts.into_iter().sum();
            debug!(depth, sccs = level.len(), summarized = level_summarized, "level done");
            summarized += level_summarized;
        }

        Ok(summarized)
    }

    /// Consumes the driver and returns the published summaries.
    pub fn collect(self) -> BTreeMap<FuncRef, Arc<D::Summary>> {
        self.db.into_map()
    }

    fn summarize_scc(&self, sccs: &CallGraphSccs, scc: SccRef) -> Result<usize> {
        let module = self.module;
        let mut claimed = Vec::new();
        for func in sccs.scc_info(scc).sorted_components() {
            let function = module
                .get_func(func)
                .ok_or(AnalysisError::UnknownFunction(func))?;
            if function.body_available() && self.db.try_claim(func) {
                claimed.push(func);
            }
        }
        if claimed.is_empty() {
            return Ok(0);
        }

        let mut analyzer = LocalAnalyzer::<D>::with_env(module, self.env.clone()).with_config(
            EngineConfig {
                retain_states: false,
                ..self.config
            },
        );

        // Callees outside of the component belong to lower levels.
        for &func in &claimed {
            for callee in self.call_graph.callees(func) {
                if sccs.scc_ref(callee) == scc {
                    continue;
                }
                if let Some(summary) = self.db.get(callee) {
                    analyzer.import_summary(callee, summary);
                }
            }
        }

        for &func in &claimed {
            analyzer.analyze_function(func)?;
        }

        for &func in &claimed {
            if let Some(summary) = analyzer.summaries().get(func) {
                self.db.publish(func, summary.clone());
            }
        }

        Ok(claimed.len())
    }
}
