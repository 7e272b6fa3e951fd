//! Domains shipped with the engine.

pub mod points_to;
pub mod reaching_defs;
pub mod taint;

pub use points_to::{
    PointsToConfig, PointsToEnv, PointsToState, PointsToSummary, Target, TargetSet,
};
pub use reaching_defs::{DefId, Definition, RdEnv, RdState, RdSummary};
pub use taint::{TaintConfig, TaintEnv, TaintLabel, TaintSet, TaintState, TaintSummary};
