//! A flow sensitive points-to analysis.
//!
//! Memory is split into cells named by [`Target`]s: the storage of a
//! variable, the memory returned by an allocator call, and the objects the
//! parameters and globals point to when a function is entered. A function is
//! analyzed once against these symbolic entry objects. Applying its summary
//! substitutes them with the targets of the caller's arguments and globals.
//!
//! Stores through an unknown pointer are ignored.

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
pub enum Target {
    /// The storage of a variable.
    Var(VarRef),
    /// The memory returned by the allocator called at a program point.
    Alloc(ProgramPoint),
    /// The object a parameter or a global points to at function entry.
    Entry(VarRef),
    /// Anything.
    Unknown,
}

pub type TargetSet = BTreeSet<Target>;

#[derive(Debug, Clone, Default)]
pub struct PointsToConfig {
    /// Functions returning fresh memory.
    pub allocators: BTreeSet<String>,
}

impl PointsToConfig {
    pub fn with_allocator(mut self, name: &str) -> Self {
        self.allocators.insert(name.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PointsToEnv {
    pub config: PointsToConfig,
}

impl PointsToEnv {
    pub fn new(config: PointsToConfig) -> Self {
        Self { config }
    }
}

/// The effect of a function on memory, in terms of its entry objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointsToSummary {
    /// Targets of the returned value.
    pub ret: TargetSet,
    /// Content of every non-local cell the function may have written.
    #[serde(with = "cell_list")]
    pub cells: BTreeMap<Target, TargetSet>,
}

/// Cells are keyed by an enum, which JSON objects can't express.
mod cell_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Target, TargetSet};

    pub fn serialize<S: Serializer>(
        cells: &BTreeMap<Target, TargetSet>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(cells.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Target, TargetSet>, D::Error> {
        let cells = Vec::<(Target, TargetSet)>::deserialize(deserializer)?;
        Ok(cells.into_iter().collect())
    }
}

/// A cell without an entry in [`PointsToState::Facts`] holds its default
/// content: nothing for variables and allocations, anything for entry
/// objects. Default contents are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointsToState {
    Bottom,
    Top,
    Facts(BTreeMap<Target, TargetSet>),
}

fn default_content(cell: Target) -> TargetSet {
    match cell {
        Target::Var(_) | Target::Alloc(_) => TargetSet::new(),
        Target::Entry(_) | Target::Unknown => TargetSet::from([Target::Unknown]),
    }
}

impl PointsToState {
    /// Returns the targets stored in `cell`.
    pub fn read(&self, cell: Target) -> TargetSet {
        match self {
            Self::Bottom => TargetSet::new(),
            Self::Top => TargetSet::from([Target::Unknown]),
            Self::Facts(facts) => facts
                .get(&cell)
                .cloned()
                .unwrap_or_else(|| default_content(cell)),
        }
    }

    pub fn points_to(&self, var: VarRef) -> TargetSet {
        self.read(Target::Var(var))
    }

    /// Returns the targets `expr` may evaluate to.
    pub fn eval(&self, expr: &Expr) -> TargetSet {
        match expr {
            Expr::Var(var) => self.points_to(*var),
            Expr::AddressOf(var) => TargetSet::from([Target::Var(*var)]),
            Expr::Deref(ptr) => self
                .eval(ptr)
                .into_iter()
                .flat_map(|target| self.read(target))
                .collect(),
            Expr::Const(_) | Expr::Nondet => TargetSet::new(),
            Expr::Op(_, args) => args.iter().flat_map(|arg| self.eval(arg)).collect(),
        }
    }

    /// The state at the entry of `func`: every parameter and every global
    /// points to its own entry object.
    fn entry_of(module: &Module, func: FuncRef) -> Self {
        let inputs = module.func(func).params.iter().copied().chain(module.globals());
        let facts = inputs
            .map(|var| (Target::Var(var), TargetSet::from([Target::Entry(var)])))
            .collect();
        Self::Facts(facts)
    }

    /// Replaces the content of `cell`. Returns `true` if the state has
    /// changed.
    fn write(&mut self, cell: Target, content: TargetSet) -> bool {
        let Self::Facts(facts) = self else {
            return false;
        };
        if cell == Target::Unknown {
            return false;
        }

        if content == default_content(cell) {
            facts.remove(&cell).is_some()
        } else if facts.get(&cell) == Some(&content) {
            false
        } else {
            facts.insert(cell, content);
            true
        }
    }

    /// Adds `content` to the content of `cell`.
    fn write_weak(&mut self, cell: Target, content: &TargetSet) -> bool {
        let mut current = self.read(cell);
        let len = current.len();
        current.extend(content.iter().copied());
        current.len() != len && self.write(cell, current)
    }

    /// Writes `content` to every cell in `targets`. A single variable or
    /// entry object is overwritten, several candidates are only added to.
    fn store(&mut self, targets: TargetSet, content: TargetSet) {
        let strong = targets.len() == 1
            && targets
                .iter()
                .all(|target| matches!(target, Target::Var(_) | Target::Entry(_)));
        for target in targets {
            if strong {
                self.write(target, content.clone());
            } else {
                self.write_weak(target, &content);
            }
        }
    }

    /// Replaces the entry objects of `callee` with their targets in `self`.
    fn substitute(
        &self,
        module: &Module,
        callee: FuncRef,
        targets: &TargetSet,
        args: &[Expr],
    ) -> TargetSet {
        let function = module.func(callee);
        let mut result = TargetSet::new();
        for &target in targets {
            let Target::Entry(var) = target else {
                result.insert(target);
                continue;
            };

            if module.var(var).is_global() {
                result.extend(self.points_to(var));
            } else {
                match function.param_index(var).and_then(|i| args.get(i)) {
                    Some(arg) => result.extend(self.eval(arg)),
                    None => {
                        result.insert(Target::Unknown);
                    }
                }
            }
        }
        result
    }

    fn transform_opaque_call(
        &mut self,
        cx: &AnalysisCtx<'_, PointsToEnv>,
        call: ProgramPoint,
        lhs: Option<VarRef>,
        callee: Option<FuncRef>,
    ) {
        let Some(lhs) = lhs else {
            return;
        };

        let allocators = &cx.env.config.allocators;
        let is_allocator =
            callee.is_some_and(|callee| allocators.contains(cx.module.func_name(callee)));
        let target = if is_allocator {
            Target::Alloc(call)
        } else {
            Target::Unknown
        };
        self.write(Target::Var(lhs), TargetSet::from([target]));
    }
}

impl Domain for PointsToState {
    type Summary = Option<PointsToSummary>;
    type Env = PointsToEnv;

    fn bottom() -> Self {
        Self::Bottom
    }

    fn top() -> Self {
        Self::Top
    }

    fn entry(cx: &mut AnalysisCtx<'_, PointsToEnv>, entry: ProgramPoint) -> Self {
        Self::entry_of(cx.module, entry.func)
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Self::Bottom)
    }

    fn transform(
        &mut self,
        cx: &mut AnalysisCtx<'_, PointsToEnv>,
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
                let targets = self.eval(rhs);
                self.write(Target::Var(*lhs), targets);
            }

            InstData::Decl(var) | InstData::Dead(var) => {
                self.write(Target::Var(*var), TargetSet::new());
            }

            InstData::Store { ptr, value } => {
                let targets = self.eval(ptr);
                let content = self.eval(value);
                self.store(targets, content);
            }

            InstData::Return(Some(value)) => {
                if let Some(ret_var) = cx.func(from).ret_var {
                    let targets = self.eval(value);
                    self.write(Target::Var(ret_var), targets);
                }
            }

            InstData::Call { lhs, target, .. } => {
                self.transform_opaque_call(cx, from, *lhs, target.direct_callee())
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
        cx: &mut AnalysisCtx<'_, PointsToEnv>,
        call: ProgramPoint,
        callee: FuncRef,
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
        let module = cx.module;
        let before = self.clone();
        let subst = |targets: &TargetSet| before.substitute(module, callee, targets, args);

        for (&cell, content) in &summary.cells {
            let content = subst(content);
            match cell {
                Target::Var(global) if module.var(global).is_global() => {
                    self.write(cell, content);
                }
                Target::Entry(_) => {
                    for target in subst(&TargetSet::from([cell])) {
                        self.write_weak(target, &content);
                    }
                }
                _ => {
                    self.write_weak(cell, &content);
                }
            }
        }

        if let Some(lhs) = lhs {
            self.write(Target::Var(*lhs), subst(&summary.ret));
        }

        Ok(())
    }

    fn merge(&mut self, other: &Self, _from: ProgramPoint, _to: ProgramPoint) -> bool {
        match (&*self, other) {
            (_, Self::Bottom) | (Self::Top, _) => false,
            (Self::Bottom, _) | (_, Self::Top) => {
                *self = other.clone();
                true
            }
            (Self::Facts(facts), Self::Facts(other_facts)) => {
                let cells: BTreeSet<Target> =
                    facts.keys().chain(other_facts.keys()).copied().collect();
                let mut changed = false;
                for cell in cells {
                    changed |= self.write_weak(cell, &other.read(cell));
                }
                changed
            }
        }
    }

    fn summarize(
        &self,
        cx: &mut AnalysisCtx<'_, PointsToEnv>,
        exit: ProgramPoint,
    ) -> Result<Self::Summary> {
        let module = cx.module;
        let ret_var = module.func(exit.func).ret_var;

        let summary = match self {
            Self::Bottom => return Ok(None),
            Self::Top => PointsToSummary {
                ret: TargetSet::from([Target::Unknown]),
                cells: module
                    .globals()
                    .map(|global| (Target::Var(global), TargetSet::from([Target::Unknown])))
                    .collect(),
            },
            Self::Facts(facts) => PointsToSummary {
                ret: ret_var.map(|var| self.points_to(var)).unwrap_or_default(),
                cells: facts
                    .iter()
                    .filter(|&(&cell, content)| match cell {
                        Target::Var(var) if module.var(var).is_local() => false,
                        Target::Var(global) => {
                            *content != TargetSet::from([Target::Entry(global)])
                        }
                        _ => true,
                    })
                    .map(|(&cell, content)| (cell, content.clone()))
                    .collect(),
            },
        };

        Ok(Some(summary))
    }

    fn fmt_state(
        &self,
        module: &Module,
        _env: &PointsToEnv,
        w: &mut dyn fmt::Write,
    ) -> fmt::Result {
        let facts = match self {
            Self::Bottom => return write!(w, "BOTTOM"),
            Self::Top => return write!(w, "TOP"),
            Self::Facts(facts) => facts,
        };
        if facts.is_empty() {
            return write!(w, "empty");
        }

        for (&cell, content) in facts {
            match cell {
                Target::Var(var) => write!(w, "{}", module.var_name(var))?,
                _ => {
                    write!(w, "*")?;
                    fmt_target(module, cell, w)?;
                }
            }
            write!(w, ": {{")?;
            for (i, &target) in content.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                fmt_target(module, target, w)?;
            }
            writeln!(w, "}}")?;
        }

        Ok(())
    }
}

fn fmt_target(module: &Module, target: Target, w: &mut dyn fmt::Write) -> fmt::Result {
    match target {
        Target::Var(var) => write!(w, "&{}", module.var_name(var)),
        Target::Alloc(at) => write!(
            w,
            "alloc@{}:{}",
            module.func_name(at.func),
            at.inst.as_u32()
        ),
        Target::Entry(var) => write!(w, "entry({})", module.var_name(var)),
        Target::Unknown => write!(w, "unknown"),
    }
}

#[cfg(test)]
mod tests {
    use lattix_ir::{InstId, Linkage, ModuleBuilder, Signature};

    use super::*;
    use crate::engine::{EngineConfig, LocalAnalyzer};

    fn env() -> PointsToEnv {
        PointsToEnv::new(PointsToConfig::default().with_allocator("malloc"))
    }

    fn retaining() -> EngineConfig {
        EngineConfig {
            retain_states: true,
            ..EngineConfig::default()
        }
    }

    fn declare(builder: &mut ModuleBuilder, name: &str, linkage: Linkage) -> FuncRef {
        builder
            .declare_function(Signature::new(name, linkage))
            .unwrap()
    }

    #[test]
    fn strong_and_weak_stores() {
        let mut builder = ModuleBuilder::new();
        let f = declare(&mut builder, "f", Linkage::Public);
        let mut fb = builder.func_builder(f);
        let [x, y, z, p, q] = ["x", "y", "z", "p", "q"].map(|name| fb.local(name));
        let other = fb.make_label();
        let join = fb.make_label();
        fb.assign(p, Expr::AddressOf(x));
        fb.store(Expr::var(p), Expr::AddressOf(y));
        fb.goto_if(Expr::Nondet, other);
        fb.assign(q, Expr::AddressOf(x));
        fb.goto(join);
        fb.bind_label(other);
        fb.assign(q, Expr::AddressOf(y));
        fb.bind_label(join);
        fb.store(Expr::var(q), Expr::AddressOf(z));
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer =
            LocalAnalyzer::<PointsToState>::with_env(&module, env()).with_config(retaining());
        analyzer.analyze_body(f).unwrap();

        insta::assert_snapshot!(analyzer.dump_string().unwrap(), @r"
        ////
        //// Function: f
        ////

        **** 0
        empty
        p = &x

        **** 1
        p: {&x}
        *p = &y

        **** 2
        x: {&y}
        p: {&x}
        if nondet goto 5

        **** 3
        x: {&y}
        p: {&x}
        q = &x

        **** 4
        x: {&y}
        p: {&x}
        q: {&x}
        goto 6

        **** 5
        x: {&y}
        p: {&x}
        q = &y

        **** 6
        x: {&y}
        p: {&x}
        q: {&x, &y}
        *q = &z

        **** 7
        x: {&y, &z}
        y: {&z}
        p: {&x}
        q: {&x, &y}
        return

        **** 8
        x: {&y, &z}
        y: {&z}
        p: {&x}
        q: {&x, &y}
        end_function
        ");

        let state = analyzer
            .state_at(ProgramPoint::new(f, InstId::from_u32(8)))
            .unwrap();
        assert_eq!(
            state.eval(&Expr::deref(Expr::var(p))),
            TargetSet::from([Target::Var(y), Target::Var(z)])
        );
    }

    #[test]
    fn summary_writes_through_parameters() {
        let mut builder = ModuleBuilder::new();
        let g = builder.declare_global("g");
        let h = builder.declare_global("h");
        let init = declare(&mut builder, "init", Linkage::Private);
        let main = declare(&mut builder, "main", Linkage::Public);
        let malloc = declare(&mut builder, "malloc", Linkage::External);

        let mut fb = builder.func_builder(init);
        let p = fb.param("p");
        let t = fb.local("t");
        fb.call_direct(Some(t), malloc, []);
        fb.store(Expr::var(p), Expr::var(t));
        fb.assign(g, Expr::AddressOf(h));
        fb.ret(Some(Expr::var(t)));
        fb.finish().unwrap();

        let mut fb = builder.func_builder(main);
        let x = fb.local("x");
        let r = fb.local("r");
        fb.call_direct(Some(r), init, [Expr::AddressOf(x)]);
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let mut analyzer =
            LocalAnalyzer::<PointsToState>::with_env(&module, env()).with_config(retaining());
        analyzer.analyze_function(main).unwrap();

        let alloc = Target::Alloc(ProgramPoint::new(init, InstId::from_u32(0)));
        let summary = analyzer.summary(init).unwrap().as_ref().unwrap();
        assert_eq!(summary.ret, TargetSet::from([alloc]));
        assert_eq!(
            summary.cells,
            BTreeMap::from([
                (Target::Var(g), TargetSet::from([Target::Var(h)])),
                (Target::Entry(p), TargetSet::from([alloc])),
            ])
        );

        let state = analyzer
            .state_at(ProgramPoint::new(main, InstId::from_u32(1)))
            .unwrap();
        assert_eq!(state.points_to(r), TargetSet::from([alloc]));
        assert_eq!(state.points_to(x), TargetSet::from([alloc]));
        assert_eq!(state.points_to(g), TargetSet::from([Target::Var(h)]));
        // `h` is untouched and still points to its entry object.
        assert_eq!(state.points_to(h), TargetSet::from([Target::Entry(h)]));
    }

    #[test]
    fn merge_with_default_content() {
        let at = ProgramPoint::new(FuncRef::from_u32(0), InstId::from_u32(0));
        let [p, x] = [0, 1].map(VarRef::from_u32);
        let alloc = Target::Alloc(at);

        let mut written = PointsToState::Facts(BTreeMap::new());
        written.write(Target::Entry(p), TargetSet::from([alloc]));
        written.write(Target::Var(x), TargetSet::from([Target::Var(p)]));
        let untouched = PointsToState::Facts(BTreeMap::new());

        let mut same = written.clone();
        assert!(!same.merge(&written, at, at));

        let mut merged = written.clone();
        assert!(merged.merge(&untouched, at, at));
        // An entry object left alone may still hold anything.
        assert_eq!(
            merged.read(Target::Entry(p)),
            TargetSet::from([alloc, Target::Unknown])
        );
        assert_eq!(merged.points_to(x), TargetSet::from([Target::Var(p)]));
        assert!(!merged.merge(&written, at, at));

        let mut other_way = untouched.clone();
        assert!(other_way.merge(&written, at, at));
        assert_eq!(other_way, merged);

        let mut top = PointsToState::Top;
        assert!(!top.merge(&written, at, at));
        assert!(merged.merge(&PointsToState::Top, at, at));
        assert_eq!(merged, PointsToState::Top);
    }

    #[test]
    fn unknown_pointers() {
        let mut state = PointsToState::Facts(BTreeMap::new());
        let x = VarRef::from_u32(0);
        state.store(TargetSet::from([Target::Unknown]), TargetSet::from([Target::Var(x)]));
        assert_eq!(state, PointsToState::Facts(BTreeMap::new()));
        assert_eq!(
            state.eval(&Expr::deref(Expr::deref(Expr::AddressOf(x)))),
            TargetSet::new()
        );
        assert_eq!(
            PointsToState::Top.eval(&Expr::var(x)),
            TargetSet::from([Target::Unknown])
        );
    }
}
