#![allow(dead_code)]

use lattix_analysis::{
    domains::{TaintConfig, TaintEnv},
    EngineConfig,
};
use lattix_ir::{FuncRef, Linkage, ModuleBuilder, Signature};

pub fn declare(builder: &mut ModuleBuilder, name: &str) -> FuncRef {
    builder
        .declare_function(Signature::new(name, Linkage::Public))
        .unwrap()
}

pub fn declare_external(builder: &mut ModuleBuilder, name: &str) -> FuncRef {
    builder
        .declare_function(Signature::new(name, Linkage::External))
        .unwrap()
}

pub fn taint_env() -> TaintEnv {
    TaintEnv::new(
        TaintConfig::default()
            .with_source("taint_source")
            .with_sanitizer("sanitize"),
    )
}

pub fn retaining() -> EngineConfig {
    EngineConfig {
        retain_states: true,
        ..EngineConfig::default()
    }
}
