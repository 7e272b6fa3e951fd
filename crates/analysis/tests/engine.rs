mod common;

use std::collections::BTreeSet;

use common::{declare, retaining};
use lattix_analysis::{
    domains::{Definition, RdState},
    AnalysisError, AnalysisOrder, Domain, EngineConfig, FuncStatus, LocalAnalyzer, ProgramPoint,
};
use lattix_ir::{
    builder::test_util::*, CallTarget, Expr, FuncRef, InstId, Module, ModuleBuilder, VarRef,
};

fn at(func: FuncRef, inst: u32) -> ProgramPoint {
    ProgramPoint::new(func, InstId::from_u32(inst))
}

fn reaching_defs(
    analyzer: &LocalAnalyzer<RdState>,
    point: ProgramPoint,
    var: VarRef,
) -> Vec<Definition> {
    let state = analyzer.state_at(point).unwrap();
    state
        .defs_of(var)
        .iter()
        .map(|&id| *analyzer.env().definition(id).unwrap())
        .collect()
}

#[test]
fn summaries_are_reused() {
    let module = build_call_module(&[("main", &["g", "h", "g"]), ("h", &["g"]), ("g", &[])]);

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module);
    assert!(analyzer.analyze_module().unwrap());

    let stats = analyzer.stats();
    assert_eq!(stats.fixpoints, 3);
    assert_eq!(stats.summaries_applied, 4);
    assert_eq!(stats.recursion_cutoffs, 0);
    for name in ["main", "h", "g"] {
        let func = func_by_name(&module, name);
        assert_eq!(analyzer.status(func), FuncStatus::Summarized);
    }
}

#[test]
fn direct_recursion() {
    let mut builder = ModuleBuilder::new();
    let f = declare(&mut builder, "f");
    let mut fb = builder.func_builder(f);
    let out = fb.make_label();
    fb.goto_if(Expr::Nondet, out);
    fb.call_direct(None, f, []);
    fb.bind_label(out);
    fb.ret(None);
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module).with_config(retaining());
    analyzer.analyze_function(f).unwrap();

    assert_eq!(analyzer.stats().recursion_cutoffs, 1);
    assert_eq!(analyzer.stats().fixpoints, 1);
    assert!(analyzer.summary(f).unwrap().returns);
    // Only the branch around the recursive call reaches the return.
    assert!(analyzer.state_at(at(f, 2)).unwrap().is_reachable());
}

#[test]
fn mutual_recursion() {
    let mut builder = ModuleBuilder::new();
    let g = builder.declare_global("g");
    let a = declare(&mut builder, "a");
    let b = declare(&mut builder, "b");

    let mut fb = builder.func_builder(a);
    fb.assign(g, Expr::Const(1));
    fb.call_direct(None, b, []);
    fb.ret(None);
    fb.finish().unwrap();

    let mut fb = builder.func_builder(b);
    let out = fb.make_label();
    fb.goto_if(Expr::Nondet, out);
    fb.call_direct(None, a, []);
    fb.bind_label(out);
    fb.ret(None);
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module);
    analyzer.analyze_function(a).unwrap();

    assert_eq!(analyzer.status(a), FuncStatus::Summarized);
    assert_eq!(analyzer.status(b), FuncStatus::Summarized);
    assert_eq!(analyzer.stats().recursion_cutoffs, 1);

    assert!(analyzer.summary(b).unwrap().values.is_empty());
    let summary = analyzer.summary(a).unwrap();
    assert_eq!(
        summary.values[&g],
        BTreeSet::from([Definition { var: g, at: at(a, 0) }])
    );
}

#[test]
fn unlowered_target_is_fatal() {
    let mut builder = ModuleBuilder::new();
    let f = declare(&mut builder, "f");
    let mut fb = builder.func_builder(f);
    fb.skip();
    fb.call(None, CallTarget::Unlowered("virtual_function".to_string()), []);
    fb.ret(None);
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module);
    let err = analyzer.analyze_function(f).unwrap_err();
    assert!(err.is_invariant_violation());
    assert_eq!(
        err.to_string(),
        "unexpected call target `virtual_function` in `f` at 1"
    );
}

#[test]
fn unknown_callee_is_fatal() {
    let mut builder = ModuleBuilder::new();
    let f = declare(&mut builder, "f");
    let mut fb = builder.func_builder(f);
    fb.call_direct(None, FuncRef::from_u32(99), []);
    fb.ret(None);
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module);
    assert!(matches!(
        analyzer.analyze_function(f),
        Err(AnalysisError::UnknownFunction(callee)) if callee == FuncRef::from_u32(99)
    ));

    // Ordering callees first reaches the unknown function on its own.
    let config = EngineConfig {
        order: AnalysisOrder::InverseTopological,
        ..EngineConfig::default()
    };
    let mut analyzer = LocalAnalyzer::<RdState>::new(&module).with_config(config);
    assert!(matches!(
        analyzer.analyze_module(),
        Err(AnalysisError::UnknownFunction(callee)) if callee == FuncRef::from_u32(99)
    ));
    assert_eq!(analyzer.status(f), FuncStatus::NotStarted);
}

fn call_through(target: impl FnOnce(VarRef) -> CallTarget) -> (Module, FuncRef) {
    let mut builder = ModuleBuilder::new();
    let f = declare(&mut builder, "f");
    let mut fb = builder.func_builder(f);
    let p = fb.param("p");
    fb.call(None, target(p), []);
    fb.ret(None);
    fb.finish().unwrap();
    (builder.build(), f)
}

#[test]
fn unresolved_targets_leave_return_site_untouched() {
    let targets: [fn(VarRef) -> CallTarget; 4] = [
        |p| CallTarget::Deref(Expr::var(p)),
        |p| CallTarget::Member(Expr::var(p), "method".to_string()),
        |p| CallTarget::Index(Expr::var(p), Expr::Const(0)),
        |_| CallTarget::NullObject,
    ];

    for target in targets {
        let (module, f) = call_through(target);
        let mut analyzer = LocalAnalyzer::<RdState>::new(&module).with_config(retaining());
        analyzer.analyze_function(f).unwrap();

        assert!(analyzer.state_at(at(f, 1)).unwrap().is_bottom());
        assert!(!analyzer.summary(f).unwrap().returns);
        assert_eq!(analyzer.stats().summaries_applied, 0);
    }
}

#[test]
fn conditional_target_joins_both_branches() {
    let mut builder = ModuleBuilder::new();
    let g = builder.declare_global("g");
    let main = declare(&mut builder, "main");
    let [set1, set2] = ["set1", "set2"].map(|name| declare(&mut builder, name));
    for (func, value) in [(set1, 1), (set2, 2)] {
        let mut fb = builder.func_builder(func);
        fb.assign(g, Expr::Const(value));
        fb.ret(None);
        fb.finish().unwrap();
    }

    let mut fb = builder.func_builder(main);
    let target = CallTarget::If {
        cond: Expr::Nondet,
        then: Box::new(CallTarget::Direct(set1)),
        else_: Box::new(CallTarget::Direct(set2)),
    };
    fb.call(None, target, []);
    fb.ret(None);
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module).with_config(retaining());
    analyzer.analyze_function(main).unwrap();

    assert_eq!(analyzer.stats().summaries_applied, 2);
    assert_eq!(
        reaching_defs(&analyzer, at(main, 1), g),
        vec![
            Definition { var: g, at: at(set1, 0) },
            Definition { var: g, at: at(set2, 0) },
        ]
    );
}

#[test]
fn intraprocedural_run_keeps_callers_definitions() {
    let mut builder = ModuleBuilder::new();
    let g = builder.declare_global("g");
    let main = declare(&mut builder, "main");
    let set = declare(&mut builder, "set");

    let mut fb = builder.func_builder(set);
    fb.assign(g, Expr::Const(2));
    fb.ret(None);
    fb.finish().unwrap();

    let mut fb = builder.func_builder(main);
    let x = fb.local("x");
    fb.assign(g, Expr::Const(1));
    fb.call_direct(Some(x), set, []);
    fb.ret(None);
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module).with_config(retaining());
    analyzer.analyze_body(main).unwrap();

    assert_eq!(analyzer.status(set), FuncStatus::NotStarted);
    assert_eq!(
        reaching_defs(&analyzer, at(main, 2), g),
        vec![Definition { var: g, at: at(main, 0) }]
    );
    assert_eq!(
        reaching_defs(&analyzer, at(main, 2), x),
        vec![Definition { var: x, at: at(main, 1) }]
    );
}

#[test]
fn dump() {
    let mut builder = ModuleBuilder::new();
    let g = builder.declare_global("g");
    let main = declare(&mut builder, "main");
    let set = declare(&mut builder, "set");

    let mut fb = builder.func_builder(set);
    fb.assign(g, Expr::Const(2));
    fb.ret(None);
    fb.finish().unwrap();

    let mut fb = builder.func_builder(main);
    let x = fb.local("x");
    fb.call_direct(Some(x), set, []);
    fb.ret(Some(Expr::var(x)));
    fb.finish().unwrap();
    let module = builder.build();

    let mut analyzer = LocalAnalyzer::<RdState>::new(&module).with_config(retaining());
    analyzer.analyze_module().unwrap();

    insta::assert_snapshot!(analyzer.dump_string().unwrap(), @r"
    ////
    //// Function: main
    ////

    **** 0

    x = call %set()

    **** 1
    g: {set:0}
    x: {main:0}
    return x

    **** 2
    g: {set:0}
    x: {main:0}
    main#return: {main:1}
    end_function

    ////
    //// Function: set
    ////

    **** 0

    g = 2

    **** 1
    g: {set:0}
    return

    **** 2
    g: {set:0}
    end_function
    ");
}
