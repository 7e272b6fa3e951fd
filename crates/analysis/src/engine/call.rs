//! Interprocedural handling of call instructions.

use lattix_ir::{CallTarget, FuncRef, InstId};
use tracing::trace;

use super::{LocalAnalyzer, Mode};
use crate::{
    domain::{AnalysisCtx, Domain, ProgramPoint},
    AnalysisError, Result,
};

impl<D: Domain> LocalAnalyzer<'_, D> {
    /// Computes the state after the call at `call` and merges it into the
    /// state at `ret`. Returns `true` if the state at `ret` has changed.
    pub(super) fn do_function_call_rec(
        &mut self,
        func: FuncRef,
        call: InstId,
        ret: InstId,
        target: &CallTarget,
        mode: Mode,
    ) -> Result<bool> {
        match target {
            CallTarget::Direct(callee) => {
                let callee = *callee;
                if self.recursion_guard.contains(&callee) {
                    trace!(callee = %self.module.func_name(callee), "recursion detected");
                    self.stats.recursion_cutoffs += 1;
                    return Ok(false);
                }
                if self.module.get_func(callee).is_none() {
                    return Err(AnalysisError::UnknownFunction(callee));
                }

                self.recursion_guard.insert(callee);
                let result = self.do_function_call(func, call, ret, callee, mode);
                self.recursion_guard.remove(&callee);
                result
            }

            CallTarget::If { then, else_, .. } => {
                let new_data_then = self.do_function_call_rec(func, call, ret, then, mode)?;
                let new_data_else = self.do_function_call_rec(func, call, ret, else_, mode)?;
                Ok(new_data_then || new_data_else)
            }

            // These are expected to be resolved by an earlier pass.
            CallTarget::Deref(_)
            | CallTarget::Member(..)
            | CallTarget::Index(..)
            | CallTarget::NullObject => Ok(false),

            CallTarget::Unlowered(kind) => Err(AnalysisError::UnexpectedCallTarget {
                func: self.module.func_name(func).to_string(),
                inst: call,
                kind: kind.clone(),
            }),
        }
    }

    fn do_function_call(
        &mut self,
        func: FuncRef,
        call: InstId,
        ret: InstId,
        callee: FuncRef,
        mode: Mode,
    ) -> Result<bool> {
        let module = self.module;
        let call_point = ProgramPoint::new(func, call);
        let ret_point = ProgramPoint::new(func, ret);

        let Some(body) = module.body(callee) else {
            // Without a body, the call is just an edge to the return site.
            trace!(callee = %module.func_name(callee), "opaque call");
            self.stats.opaque_calls += 1;
            return self.step(call_point, ret_point);
        };
        let name = || module.func_name(callee).to_string();

        if !self.summaries.contains(callee) {
            let begin = body
                .first()
                .ok_or_else(|| AnalysisError::EmptyBody(name()))?;
            let begin_point = ProgramPoint::new(callee, begin);

            let mut entry_state = self.state(call_point).clone();
            let mut cx = AnalysisCtx::new(module, &mut self.env);
            entry_state.transform(&mut cx, call_point, begin_point)?;
            self.merge(&entry_state, call_point, begin_point);

            self.fixpoint(callee, mode)?;
        }

        if body.end_function().is_none() {
            return Err(AnalysisError::MissingEndFunction(name()));
        }
        let summary = self
            .summaries
            .get(callee)
            .cloned()
            .ok_or_else(|| AnalysisError::MissingSummary(name()))?;

        self.stats.summaries_applied += 1;
        let mut new_values = self.state(call_point).clone();
        let mut cx = AnalysisCtx::new(module, &mut self.env);
        new_values.transform_call(&mut cx, call_point, callee, &summary)?;
        Ok(self.merge(&new_values, call_point, ret_point))
    }
}
