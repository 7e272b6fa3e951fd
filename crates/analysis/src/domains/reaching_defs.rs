//! Reaching definitions per variable.
//!
//! Definitions are interned in the [`RdEnv`]; a state maps every variable to
//! the sorted ids of the definitions that may reach the program point.
//! Summaries carry the definitions themselves so that they can be moved
//! between analyzers with different interners.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use cranelift_entity::{entity_impl, EntityRef};
use indexmap::IndexSet;
use lattix_ir::{Expr, FuncRef, InstData, Module, VarRef};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AnalysisCtx, Domain, ProgramPoint},
    AnalysisError, Result,
};

/// An assignment of `var` at `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Definition {
    pub var: VarRef,
    pub at: ProgramPoint,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefId(u32);
entity_impl!(DefId, "def");

#[derive(Debug, thiserror::Error)]
#[error("{0} is not an interned definition")]
pub struct UnknownDefinition(pub DefId);

#[derive(Debug, Clone, Default)]
pub struct RdEnv {
    defs: IndexSet<Definition>,
}

impl RdEnv {
    pub fn intern(&mut self, def: Definition) -> DefId {
        let (index, _) = self.defs.insert_full(def);
        DefId::new(index)
    }

    pub fn definition(&self, id: DefId) -> Option<&Definition> {
        self.defs.get_index(id.index())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Definitions of non-local variables that reach the exit of a function.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RdSummary {
    /// `false` if the exit is unreachable.
    pub returns: bool,
    pub values: BTreeMap<VarRef, BTreeSet<Definition>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdState {
    reachable: bool,
    values: BTreeMap<VarRef, Vec<DefId>>,
}

impl RdState {
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Returns the ids of the definitions of `var` that reach this point in
    /// ascending order.
    pub fn defs_of(&self, var: VarRef) -> &[DefId] {
        self.values.get(&var).map_or(&[], Vec::as_slice)
    }

    pub fn vars(&self) -> impl Iterator<Item = VarRef> + '_ {
        self.values.keys().copied()
    }

    fn kill(&mut self, var: VarRef) {
        self.values.remove(&var);
    }

    fn gen(&mut self, env: &mut RdEnv, var: VarRef, at: ProgramPoint) {
        let id = env.intern(Definition { var, at });
        self.values.insert(var, vec![id]);
    }

    /// Keeps the variables visible to a newly started thread.
    fn retain_shared(&mut self, module: &Module) {
        self.values.retain(|&var, _| module.var(var).is_shared());
    }

    fn merge_values<'a>(
        &mut self,
        other: impl Iterator<Item = (&'a VarRef, &'a Vec<DefId>)>,
    ) -> bool {
        let mut more = false;
        for (&var, defs) in other {
            if defs.is_empty() {
                continue;
            }
            more |= merge_sorted(self.values.entry(var).or_default(), defs);
        }
        more
    }
}

/// Merges the sorted `src` into the sorted `dest`. Returns `true` if `dest`
/// has grown.
fn merge_sorted(dest: &mut Vec<DefId>, src: &[DefId]) -> bool {
    if src.iter().all(|id| dest.binary_search(id).is_ok()) {
        return false;
    }

    let mut merged = Vec::with_capacity(dest.len() + src.len());
    let (mut i, mut j) = (0, 0);
    while i < dest.len() && j < src.len() {
        if dest[i] < src[j] {
            merged.push(dest[i]);
            i += 1;
        } else if src[j] < dest[i] {
            merged.push(src[j]);
            j += 1;
        } else {
            merged.push(dest[i]);
            i += 1;
            j += 1;
        }
    }
    merged.extend_from_slice(&dest[i..]);
    merged.extend_from_slice(&src[j..]);

    *dest = merged;
    true
}

impl Domain for RdState {
    type Summary = RdSummary;
    type Env = RdEnv;

    fn bottom() -> Self {
        Self {
            reachable: false,
            values: BTreeMap::new(),
        }
    }

    fn top() -> Self {
        Self {
            reachable: true,
            values: BTreeMap::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        !self.reachable
    }

    fn transform(
        &mut self,
        cx: &mut AnalysisCtx<'_, RdEnv>,
        from: ProgramPoint,
        to: ProgramPoint,
    ) -> Result<()> {
        if !self.reachable {
            return Ok(());
        }

        // The callee starts from scratch, the caller's definitions are kept
        // at the call site.
        if from.func != to.func {
            *self = Self::top();
            return Ok(());
        }

        let Some(inst) = cx.inst(from) else {
            return Ok(());
        };
        match inst {
            InstData::Dead(var) => self.kill(*var),

            InstData::Assign { lhs: var, .. }
            | InstData::Decl(var)
            | InstData::Call { lhs: Some(var), .. }
            | InstData::Store {
                ptr: Expr::AddressOf(var),
                ..
            } => {
                self.kill(*var);
                self.gen(cx.env, *var, from);
            }

            InstData::Return(Some(_)) => {
                if let Some(ret_var) = cx.func(from).ret_var {
                    self.kill(ret_var);
                    self.gen(cx.env, ret_var, from);
                }
            }

            InstData::StartThread(dest) if *dest == to.inst => self.retain_shared(cx.module),

            _ => {}
        }

        Ok(())
    }

    fn transform_call(
        &mut self,
        cx: &mut AnalysisCtx<'_, RdEnv>,
        call: ProgramPoint,
        _callee: FuncRef,
        summary: &RdSummary,
    ) -> Result<()> {
        if !self.reachable {
            return Ok(());
        }
        if !summary.returns {
            *self = Self::bottom();
            return Ok(());
        }

        for (&var, defs) in &summary.values {
            let mut ids: Vec<_> = defs.iter().map(|def| cx.env.intern(*def)).collect();
            ids.sort_unstable();
            ids.dedup();
            self.values.insert(var, ids);
        }

        if let Some(InstData::Call { lhs: Some(lhs), .. }) = cx.inst(call) {
            self.kill(*lhs);
            self.gen(cx.env, *lhs, call);
        }

        Ok(())
    }

    fn merge(&mut self, other: &Self, _from: ProgramPoint, _to: ProgramPoint) -> bool {
        if !other.reachable {
            return false;
        }
        if !self.reachable {
            *self = other.clone();
            return true;
        }

        self.merge_values(other.values.iter())
    }

    /// Only definitions of global and shared variables cross into another
    /// thread. Unreachable states stay unreachable.
    fn merge_shared(
        &mut self,
        other: &Self,
        _from: ProgramPoint,
        _to: ProgramPoint,
        module: &Module,
    ) -> Result<bool> {
        if !self.reachable || !other.reachable {
            return Ok(false);
        }

        let shared = other
            .values
            .iter()
            .filter(|(var, _)| module.var(**var).is_shared());
        Ok(self.merge_values(shared))
    }

    fn summarize(&self, cx: &mut AnalysisCtx<'_, RdEnv>, _exit: ProgramPoint) -> Result<RdSummary> {
        let mut summary = RdSummary {
            returns: self.reachable,
            values: BTreeMap::new(),
        };

        for (&var, ids) in &self.values {
            if cx.module.var(var).is_local() {
                continue;
            }

            let defs = ids
                .iter()
                .map(|&id| {
                    cx.env
                        .definition(id)
                        .copied()
                        .ok_or_else(|| AnalysisError::domain(UnknownDefinition(id)))
                })
                .collect::<Result<_>>()?;
            summary.values.insert(var, defs);
        }

        Ok(summary)
    }

    fn fmt_state(&self, module: &Module, env: &RdEnv, w: &mut dyn fmt::Write) -> fmt::Result {
        if !self.reachable {
            return write!(w, "BOTTOM");
        }

        for (&var, ids) in &self.values {
            write!(w, "{}: {{", module.var_name(var))?;
            for (i, &id) in ids.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                match env.definition(id) {
                    Some(def) => write!(
                        w,
                        "{}:{}",
                        module.func_name(def.at.func),
                        def.at.inst.as_u32()
                    )?,
                    None => write!(w, "{id}")?,
                }
            }
            writeln!(w, "}}")?;
        }

        Ok(())
    }
}
