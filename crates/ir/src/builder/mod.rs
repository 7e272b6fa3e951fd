mod func_builder;
mod module_builder;

use cranelift_entity::entity_impl;

pub use func_builder::FunctionBuilder;
pub use module_builder::ModuleBuilder;

/// A jump destination that is not inserted yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(u32);
entity_impl!(Label, "label");

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("function `{0}` is declared more than once")]
    DuplicatedFunction(String),

    #[error("function `{0}` is not declared")]
    UndeclaredFunction(String),

    #[error("function `{0}` already has a body")]
    DuplicatedBody(String),

    #[error("external function `{0}` can't have a body")]
    ExternalWithBody(String),

    #[error("{label} is never bound in `{func}`")]
    UnboundLabel { func: String, label: Label },
}

pub mod test_util {
    use super::*;

    use crate::{
        ir_writer::FuncWriter,
        module::{FuncRef, Module},
        Linkage, Signature,
    };

    /// Builds a module from `(caller, callees)` pairs. Every caller gets a
    /// body that calls its callees in order and returns; names that only
    /// appear as callees are declared as external functions.
    pub fn build_call_module(funcs: &[(&str, &[&str])]) -> Module {
        let mut builder = ModuleBuilder::new();

        for (name, _) in funcs {
            builder
                .declare_function(Signature::new(name, Linkage::Public))
                .unwrap();
        }
        for (_, callees) in funcs {
            for callee in callees.iter() {
                if builder.lookup_func(callee).is_none() {
                    builder
                        .declare_function(Signature::new(callee, Linkage::External))
                        .unwrap();
                }
            }
        }

        for (name, callees) in funcs {
            let func_ref = builder.lookup_func(name).unwrap();
            let mut fb = builder.func_builder(func_ref);
            for callee in callees.iter() {
                fb.call_named(None, callee, []).unwrap();
            }
            fb.ret(None);
            fb.finish().unwrap();
        }

        builder.build()
    }

    pub fn func_by_name(module: &Module, name: &str) -> FuncRef {
        module.lookup_func(name).unwrap()
    }

    pub fn dump_func(module: &Module, func_ref: FuncRef) -> String {
        let mut writer = FuncWriter::new(module, func_ref);
        writer.dump_string().unwrap()
    }
}
