//! The interface between the fixpoint engine and an abstract domain.

use std::fmt;

use lattix_ir::{FuncRef, Function, InstData, InstId, Module};
use serde::{Deserialize, Serialize};

use crate::{AnalysisError, Result};

/// An instruction of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramPoint {
    pub func: FuncRef,
    pub inst: InstId,
}

impl ProgramPoint {
    pub fn new(func: FuncRef, inst: InstId) -> Self {
        Self { func, inst }
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.func, self.inst.as_u32())
    }
}

/// What a domain sees of the program while it's being analyzed.
pub struct AnalysisCtx<'a, E> {
    pub module: &'a Module,
    pub env: &'a mut E,
}

impl<'a, E> AnalysisCtx<'a, E> {
    pub fn new(module: &'a Module, env: &'a mut E) -> Self {
        Self { module, env }
    }

    pub fn func(&self, point: ProgramPoint) -> &'a Function {
        self.module.func(point.func)
    }

    /// Returns the instruction at `point`. Every point handed to a domain
    /// belongs to a function with a body.
    pub fn inst(&self, point: ProgramPoint) -> Option<&'a InstData> {
        let body = self.module.body(point.func)?;
        Some(body.inst(point.inst))
    }
}

/// An abstract domain, i.e. the state of a program point together with its
/// flow functions.
///
/// A `transform` whose `from` and `to` belong to different functions is the
/// edge from a call to the first instruction of the callee. A `transform` from
/// a call to the next instruction of the same function is an opaque call: the
/// engine uses it when the callee has no body and when calls aren't followed.
pub trait Domain: Clone + fmt::Debug {
    type Summary: Clone + fmt::Debug + Send + Sync;

    /// Domain specific data shared by every state, e.g. an interner.
    type Env: Default;

    /// No state, i.e. the point is unreachable.
    fn bottom() -> Self;

    /// Every state.
    fn top() -> Self;

    /// A reasonable state for the entry of an analyzed function.
    fn entry(_cx: &mut AnalysisCtx<'_, Self::Env>, _entry: ProgramPoint) -> Self {
        Self::top()
    }

    fn is_bottom(&self) -> bool;

    fn transform(
        &mut self,
        cx: &mut AnalysisCtx<'_, Self::Env>,
        from: ProgramPoint,
        to: ProgramPoint,
    ) -> Result<()>;

    /// Applies the summary of `callee` to the state before `call`. The result
    /// flows to the instruction after the call.
    fn transform_call(
        &mut self,
        cx: &mut AnalysisCtx<'_, Self::Env>,
        call: ProgramPoint,
        callee: FuncRef,
        summary: &Self::Summary,
    ) -> Result<()>;

    /// Joins `other` into `self`. Returns `true` if `self` has changed.
    fn merge(&mut self, other: &Self, from: ProgramPoint, to: ProgramPoint) -> bool;

    /// Joins the part of `other` that is visible to other threads.
    fn merge_shared(
        &mut self,
        _other: &Self,
        _from: ProgramPoint,
        _to: ProgramPoint,
        _module: &Module,
    ) -> Result<bool> {
        Err(AnalysisError::Unsupported("merge_shared"))
    }

    /// Computes the summary of a function from the state at its
    /// `EndFunction` instruction.
    fn summarize(
        &self,
        cx: &mut AnalysisCtx<'_, Self::Env>,
        exit: ProgramPoint,
    ) -> Result<Self::Summary>;

    fn fmt_state(&self, module: &Module, env: &Self::Env, w: &mut dyn fmt::Write) -> fmt::Result;
}
