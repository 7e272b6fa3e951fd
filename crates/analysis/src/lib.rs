pub mod call_graph;
pub mod cfg;
pub mod domain;
pub mod domains;
pub mod domtree;
pub mod engine;
pub mod error;

pub use call_graph::{CallGraph, CallGraphOptions};
pub use cfg::{ControlFlowGraph, Direction};
pub use domain::{AnalysisCtx, Domain, ProgramPoint};
pub use domtree::Dominators;
pub use engine::{
    AnalysisOrder, AnalysisStats, EngineConfig, FuncStatus, LocalAnalyzer, ParallelDriver,
    SharedSummaryDb, SummaryDb, SummaryStore,
};
pub use error::{AnalysisError, Result};
