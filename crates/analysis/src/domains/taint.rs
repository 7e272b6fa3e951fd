//! A taint analysis that tracks which inputs of a function may flow into
//! each variable.
//!
//! Taint is expressed relative to the function being analyzed: a
//! [`TaintLabel::Param`] or [`TaintLabel::EntryGlobal`] label stands for
//! whatever taint the parameter or global carries at the call site. Applying a
//! summary substitutes these labels with the taints of the caller.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use lattix_ir::{Expr, FuncRef, InstData, Module, VarRef};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AnalysisCtx, Domain, ProgramPoint},
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaintLabel {
    /// The result of a call to a configured source.
    Source(FuncRef),
    /// The value of a parameter at function entry.
    Param(u32),
    /// The value of a global at function entry.
    EntryGlobal(VarRef),
    /// Anything.
    Unknown,
}

pub type TaintSet = BTreeSet<TaintLabel>;

/// Functions with a known effect on taint. They only matter when the call
/// isn't analyzed, e.g. because the function has no body.
#[derive(Debug, Clone, Default)]
pub struct TaintConfig {
    /// Functions whose result is tainted.
    pub sources: BTreeSet<String>,
    /// Functions whose result is clean whatever their arguments.
    pub sanitizers: BTreeSet<String>,
}

impl TaintConfig {
    pub fn with_source(mut self, name: &str) -> Self {
        self.sources.insert(name.to_string());
        self
    }

    pub fn with_sanitizer(mut self, name: &str) -> Self {
        self.sanitizers.insert(name.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaintEnv {
    pub config: TaintConfig,
}

impl TaintEnv {
    pub fn new(config: TaintConfig) -> Self {
        Self { config }
    }
}

/// The effect of a function on taint, expressed in terms of its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaintSummary {
    /// Taint of the returned value.
    pub ret: TaintSet,
    /// Globals whose taint at exit differs from their taint at entry.
    pub globals: BTreeMap<VarRef, TaintSet>,
}

/// A variable without an entry in [`TaintState::Facts`] is untainted. Empty
/// sets are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaintState {
    Bottom,
    Top,
    Facts(BTreeMap<VarRef, TaintSet>),
}

impl TaintState {
    pub fn read(&self, var: VarRef) -> TaintSet {
        match self {
            Self::Bottom => TaintSet::new(),
            Self::Top => TaintSet::from([TaintLabel::Unknown]),
            Self::Facts(facts) => facts.get(&var).cloned().unwrap_or_default(),
        }
    }

    pub fn eval(&self, expr: &Expr) -> TaintSet {
        expr.vars().into_iter().flat_map(|var| self.read(var)).collect()
    }

    pub fn is_tainted(&self, var: VarRef) -> bool {
        !self.read(var).is_empty()
    }

    /// The state at the entry of `func`: every parameter and every global
    /// carries its own entry label.
    fn entry_of(module: &Module, func: FuncRef) -> Self {
        let mut facts = BTreeMap::new();
        for (i, &param) in module.func(func).params.iter().enumerate() {
            facts.insert(param, TaintSet::from([TaintLabel::Param(i as u32)]));
        }
        for global in module.globals() {
            facts.insert(global, TaintSet::from([TaintLabel::EntryGlobal(global)]));
        }
        Self::Facts(facts)
    }

    fn write(&mut self, var: VarRef, taint: TaintSet) {
        let Self::Facts(facts) = self else {
            return;
        };
        if taint.is_empty() {
            facts.remove(&var);
        } else {
            facts.insert(var, taint);
        }
    }

    /// Replaces the entry labels of a callee with their values in `self`.
    fn substitute(&self, taint: &TaintSet, args: &[Expr]) -> TaintSet {
        let mut result = TaintSet::new();
        for label in taint {
            match *label {
                TaintLabel::Param(i) => match args.get(i as usize) {
                    Some(arg) => result.extend(self.eval(arg)),
                    None => {
                        result.insert(TaintLabel::Unknown);
                    }
                },
                TaintLabel::EntryGlobal(global) => result.extend(self.read(global)),
                TaintLabel::Source(_) | TaintLabel::Unknown => {
                    result.insert(*label);
                }
            }
        }
        result
    }

    fn transform_opaque_call(
        &mut self,
        cx: &AnalysisCtx<'_, TaintEnv>,
        lhs: Option<VarRef>,
        callee: Option<FuncRef>,
        args: &[Expr],
    ) {
        let Some(lhs) = lhs else {
            return;
        };

        let name = callee.map(|callee| cx.module.func_name(callee));
        let config = &cx.env.config;
        let taint = match (callee, name) {
            (Some(callee), Some(name)) if config.sources.contains(name) => {
                TaintSet::from([TaintLabel::Source(callee)])
            }
            (_, Some(name)) if config.sanitizers.contains(name) => TaintSet::new(),
            _ => args.iter().flat_map(|arg| self.eval(arg)).collect(),
        };
        self.write(lhs, taint);
    }
}

impl Domain for TaintState {
    type Summary = Option<TaintSummary>;
    type Env = TaintEnv;

    fn bottom() -> Self {
        Self::Bottom
    }

    fn top() -> Self {
        Self::Top
    }

    fn entry(cx: &mut AnalysisCtx<'_, TaintEnv>, entry: ProgramPoint) -> Self {
        Self::entry_of(cx.module, entry.func)
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Self::Bottom)
    }

    fn transform(
        &mut self,
        cx: &mut AnalysisCtx<'_, TaintEnv>,
        from: ProgramPoint,
        to: ProgramPoint,
    ) -> Result<()> {
        if self.is_bottom() {
            return Ok(());
        }

        if from.func != to.func {
            *self = Self::entry_of(cx.module, to.func);
            return Ok(());
        }
        if matches!(self, Self::Top) {
            return Ok(());
        }

        let Some(inst) = cx.inst(from) else {
            return Ok(());
        };
        match inst {
            InstData::Assign { lhs, rhs } => {
                let taint = self.eval(rhs);
                self.write(*lhs, taint);
            }

            InstData::Decl(var) | InstData::Dead(var) => self.write(*var, TaintSet::new()),

            // Memory isn't tracked, except for stores to a named variable.
            InstData::Store { ptr, value } => {
                if let Expr::AddressOf(var) = ptr {
                    let taint = self.eval(value);
                    self.write(*var, taint);
                }
            }

            InstData::Return(Some(value)) => {
                if let Some(ret_var) = cx.func(from).ret_var {
                    let taint = self.eval(value);
                    self.write(ret_var, taint);
                }
            }

            InstData::Call { lhs, target, args } => {
                self.transform_opaque_call(cx, *lhs, target.direct_callee(), args)
            }

            InstData::Skip
            | InstData::Goto { .. }
            | InstData::Return(None)
            | InstData::StartThread(_)
            | InstData::EndThread
            | InstData::EndFunction => {}
        }

        Ok(())
    }

    fn transform_call(
        &mut self,
        cx: &mut AnalysisCtx<'_, TaintEnv>,
        call: ProgramPoint,
        _callee: FuncRef,
        summary: &Self::Summary,
    ) -> Result<()> {
        let Some(summary) = summary else {
            // The callee never returns.
            *self = Self::Bottom;
            return Ok(());
        };
        if !matches!(self, Self::Facts(_)) {
            return Ok(());
        }
        let Some(InstData::Call { lhs, args, .. }) = cx.inst(call) else {
            return Ok(());
        };

        // Every substitution reads the state before the call.
        let globals: Vec<_> = summary
            .globals
            .iter()
            .map(|(&global, taint)| (global, self.substitute(taint, args)))
            .collect();
        let ret = self.substitute(&summary.ret, args);

        for (global, taint) in globals {
            self.write(global, taint);
        }
        if let Some(lhs) = lhs {
            self.write(*lhs, ret);
        }

        Ok(())
    }

    fn merge(&mut self, other: &Self, _from: ProgramPoint, _to: ProgramPoint) -> bool {
        let Self::Facts(other_facts) = other else {
            if matches!(other, Self::Top) && !matches!(self, Self::Top) {
                *self = Self::Top;
                return true;
            }
            return false;
        };

        match self {
            Self::Top => false,
            Self::Bottom => {
                *self = other.clone();
                true
            }
            Self::Facts(facts) => {
                let mut changed = false;
                for (var, taint) in other_facts {
                    let current = facts.entry(*var).or_default();
                    let len = current.len();
                    current.extend(taint.iter().copied());
                    changed |= current.len() != len;
                }
                changed
            }
        }
    }

    fn summarize(
        &self,
        cx: &mut AnalysisCtx<'_, TaintEnv>,
        exit: ProgramPoint,
    ) -> Result<Self::Summary> {
        let module = cx.module;
        let ret_var = module.func(exit.func).ret_var;

        let summary = match self {
            Self::Bottom => return Ok(None),
            Self::Top => TaintSummary {
                ret: TaintSet::from([TaintLabel::Unknown]),
                globals: module
                    .globals()
                    .map(|global| (global, TaintSet::from([TaintLabel::Unknown])))
                    .collect(),
            },
            Self::Facts(_) => TaintSummary {
                ret: ret_var.map(|var| self.read(var)).unwrap_or_default(),
                globals: module
                    .globals()
                    .filter_map(|global| {
                        let taint = self.read(global);
                        let unchanged = taint.len() == 1
                            && taint.contains(&TaintLabel::EntryGlobal(global));
                        (!unchanged).then_some((global, taint))
                    })
                    .collect(),
            },
        };

        Ok(Some(summary))
    }

    fn fmt_state(&self, module: &Module, _env: &TaintEnv, w: &mut dyn fmt::Write) -> fmt::Result {
        let facts = match self {
            Self::Bottom => return write!(w, "BOTTOM"),
            Self::Top => return write!(w, "TOP"),
            Self::Facts(facts) => facts,
        };
        if facts.is_empty() {
            return write!(w, "clean");
        }

        for (&var, taint) in facts {
            write!(w, "{}: {{", module.var_name(var))?;
            for (i, label) in taint.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                match *label {
                    TaintLabel::Source(func) => write!(w, "source %{}", module.func_name(func))?,
                    TaintLabel::Param(i) => write!(w, "param {i}")?,
                    TaintLabel::EntryGlobal(global) => {
                        write!(w, "entry {}", module.var_name(global))?
                    }
                    TaintLabel::Unknown => write!(w, "unknown")?,
                }
            }
            writeln!(w, "}}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lattix_ir::{
        builder::test_util::build_call_module, InstId, Linkage, ModuleBuilder, Op, Signature,
    };

    use super::*;
    use crate::engine::{EngineConfig, LocalAnalyzer};

    fn env() -> TaintEnv {
        TaintEnv::new(
            TaintConfig::default()
                .with_source("taint_source")
                .with_sanitizer("sanitize"),
        )
    }

    fn declare(builder: &mut ModuleBuilder, name: &str, linkage: Linkage) -> FuncRef {
        builder
            .declare_function(Signature::new(name, linkage))
            .unwrap()
    }

    #[test]
    fn opaque_calls() {
        let mut builder = ModuleBuilder::new();
        let f = declare(&mut builder, "f", Linkage::Public);
        let source = declare(&mut builder, "taint_source", Linkage::External);
        let sanitize = declare(&mut builder, "sanitize", Linkage::External);
        let other = declare(&mut builder, "other", Linkage::External);

        let mut fb = builder.func_builder(f);
        let x = fb.local("x");
        let y = fb.local("y");
        let z = fb.local("z");
        let w = fb.local("w");
        fb.call_direct(Some(x), source, []);
        fb.assign(y, Expr::binary(Op::Add, Expr::var(x), Expr::Const(1)));
        fb.call_direct(Some(z), sanitize, [Expr::var(y)]);
        fb.call_direct(Some(w), other, [Expr::var(y), Expr::Const(2)]);
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer = LocalAnalyzer::<TaintState>::with_env(&module, env()).with_config(
            EngineConfig {
                retain_states: true,
                ..EngineConfig::default()
            },
        );
        analyzer.analyze_body(f).unwrap();

        let state = analyzer
            .state_at(ProgramPoint::new(f, InstId::from_u32(4)))
            .unwrap();
        let tainted = TaintSet::from([TaintLabel::Source(source)]);
        assert_eq!(state.read(x), tainted);
        assert_eq!(state.read(y), tainted);
        assert!(!state.is_tainted(z));
        assert_eq!(state.read(w), tainted);
    }

    #[test]
    fn summary_is_relative_to_inputs() {
        let mut builder = ModuleBuilder::new();
        let g = builder.declare_global("g");
        let f = declare(&mut builder, "f", Linkage::Public);

        let mut fb = builder.func_builder(f);
        let a = fb.param("a");
        let b = fb.param("b");
        let done = fb.make_label();
        fb.goto_if(Expr::Nondet, done);
        fb.assign(g, Expr::var(a));
        fb.bind_label(done);
        fb.ret(Some(Expr::var(b)));
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer = LocalAnalyzer::<TaintState>::with_env(&module, env());
        analyzer.analyze_function(f).unwrap();

        let summary = analyzer.summary(f).unwrap().as_ref().unwrap();
        assert_eq!(summary.ret, TaintSet::from([TaintLabel::Param(1)]));
        assert_eq!(
            summary.globals,
            BTreeMap::from([(
                g,
                TaintSet::from([TaintLabel::Param(0), TaintLabel::EntryGlobal(g)])
            )])
        );
    }

    #[test]
    fn apply_summary() {
        let mut builder = ModuleBuilder::new();
        let g = builder.declare_global("g");
        let id = declare(&mut builder, "id", Linkage::Private);
        let main = declare(&mut builder, "main", Linkage::Public);
        let source = declare(&mut builder, "taint_source", Linkage::External);

        let mut fb = builder.func_builder(id);
        let p = fb.param("p");
        fb.assign(g, Expr::Const(0));
        fb.ret(Some(Expr::var(p)));
        fb.finish().unwrap();

        let mut fb = builder.func_builder(main);
        let s = fb.local("s");
        let r = fb.local("r");
        fb.call_direct(Some(s), source, []);
        fb.assign(g, Expr::var(s));
        fb.call_direct(Some(r), id, [Expr::var(s)]);
        fb.ret(Some(Expr::var(r)));
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer = LocalAnalyzer::<TaintState>::with_env(&module, env());
        analyzer.analyze_function(main).unwrap();

        let summary = analyzer.summary(main).unwrap().as_ref().unwrap();
        assert_eq!(summary.ret, TaintSet::from([TaintLabel::Source(source)]));
        // `id` overwrites the global with a constant.
        assert_eq!(summary.globals, BTreeMap::from([(g, TaintSet::new())]));
        assert_eq!(analyzer.stats().summaries_applied, 1);
    }

    #[test]
    fn callee_never_returns() {
        let mut builder = ModuleBuilder::new();
        let spin = declare(&mut builder, "spin", Linkage::Private);
        let main = declare(&mut builder, "main", Linkage::Public);

        let mut fb = builder.func_builder(spin);
        let head = fb.make_label();
        fb.bind_label(head);
        fb.goto(head);
        fb.finish().unwrap();

        let mut fb = builder.func_builder(main);
        fb.call_direct(None, spin, []);
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer = LocalAnalyzer::<TaintState>::with_env(&module, env());
        analyzer.analyze_function(main).unwrap();
        assert_eq!(analyzer.summary(spin), Some(&None));
        assert_eq!(analyzer.summary(main), Some(&None));
    }

    #[test]
    fn store_to_address_of_variable() {
        let mut builder = ModuleBuilder::new();
        let f = declare(&mut builder, "f", Linkage::Public);
        let source = declare(&mut builder, "taint_source", Linkage::External);

        let mut fb = builder.func_builder(f);
        let p = fb.param("p");
        let x = fb.local("x");
        let y = fb.local("y");
        fb.call_direct(Some(x), source, []);
        fb.store(Expr::AddressOf(y), Expr::var(x));
        fb.store(Expr::var(p), Expr::Const(0));
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer = LocalAnalyzer::<TaintState>::with_env(&module, env()).with_config(
            EngineConfig {
                retain_states: true,
                ..EngineConfig::default()
            },
        );
        analyzer.analyze_body(f).unwrap();

        let state = analyzer
            .state_at(ProgramPoint::new(f, InstId::from_u32(3)))
            .unwrap();
        assert_eq!(state.read(y), TaintSet::from([TaintLabel::Source(source)]));
        assert_eq!(state.read(p), TaintSet::from([TaintLabel::Param(0)]));
    }

    #[test]
    fn merge_is_an_upper_bound() {
        let at = ProgramPoint::new(FuncRef::from_u32(0), InstId::from_u32(0));
        let [x, y, z, g] = [0, 1, 2, 3].map(VarRef::from_u32);
        let a = TaintState::Facts(BTreeMap::from([
            (x, TaintSet::from([TaintLabel::Param(0)])),
            (y, TaintSet::from([TaintLabel::Source(FuncRef::from_u32(1))])),
        ]));
        let b = TaintState::Facts(BTreeMap::from([
            (y, TaintSet::from([TaintLabel::Unknown])),
            (z, TaintSet::from([TaintLabel::EntryGlobal(g), TaintLabel::Param(1)])),
        ]));

        let mut same = a.clone();
        assert!(!same.merge(&a, at, at));
        assert_eq!(same, a);

        let mut merged = a.clone();
        assert!(merged.merge(&b, at, at));
        for var in [x, y, z, g] {
            assert!(merged.read(var).is_superset(&a.read(var)));
            assert!(merged.read(var).is_superset(&b.read(var)));
        }
        assert_eq!(merged.read(y).len(), 2);

        // Joining what is already included changes nothing.
        assert!(!merged.merge(&b, at, at));
        assert!(!merged.merge(&a, at, at));

        let mut other_way = b.clone();
        assert!(other_way.merge(&a, at, at));
        assert_eq!(other_way, merged);
    }

    #[test]
    fn merge_absorbs_into_top() {
        let module = build_call_module(&[("f", &[])]);
        let f = module.lookup_func("f").unwrap();
        let at = ProgramPoint::new(f, InstId::from_u32(0));

        let mut state = TaintState::Bottom;
        assert!(!state.merge(&TaintState::Bottom, at, at));
        assert!(state.merge(&TaintState::Facts(BTreeMap::new()), at, at));
        assert!(state.merge(&TaintState::Top, at, at));
        assert!(!state.merge(&TaintState::Facts(BTreeMap::new()), at, at));
        assert_eq!(state, TaintState::Top);
    }
}
