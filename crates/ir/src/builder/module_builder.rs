use cranelift_entity::PrimaryMap;
use indexmap::IndexMap;

use super::{BuildError, FunctionBuilder};
use crate::{
    module::FuncRef,
    var::{VarData, VarRef},
    Function, Module, Signature,
};

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    pub(super) funcs: PrimaryMap<FuncRef, Function>,
    pub(super) vars: PrimaryMap<VarRef, VarData>,

    /// Map function name -> FuncRef to avoid duplicated declaration.
    declared_funcs: IndexMap<String, FuncRef>,

    entry: Option<FuncRef>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_function(&mut self, sig: Signature) -> Result<FuncRef, BuildError> {
        if self.declared_funcs.contains_key(sig.name()) {
            return Err(BuildError::DuplicatedFunction(sig.name().to_string()));
        }

        let name = sig.name().to_string();
        let func_ref = self.funcs.push(Function::new(sig));
        self.declared_funcs.insert(name, func_ref);
        Ok(func_ref)
    }

    pub fn lookup_func(&self, name: &str) -> Option<FuncRef> {
        self.declared_funcs.get(name).copied()
    }

    pub fn declare_global(&mut self, name: &str) -> VarRef {
        self.vars.push(VarData::global(name))
    }

    pub fn make_var(&mut self, data: VarData) -> VarRef {
        self.vars.push(data)
    }

    pub fn set_entry(&mut self, func_ref: FuncRef) {
        self.entry = Some(func_ref);
    }

    pub fn func_builder(&mut self, func_ref: FuncRef) -> FunctionBuilder<'_> {
        FunctionBuilder::new(self, func_ref)
    }

    pub fn build(self) -> Module {
        Module {
            funcs: self.funcs,
            vars: self.vars,
            entry: self.entry,
            func_names: self.declared_funcs,
        }
    }
}
