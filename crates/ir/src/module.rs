use cranelift_entity::{entity_impl, PrimaryMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    body::Body,
    var::{VarData, VarRef},
    Function,
};

/// A whole program: the function map together with the symbol table that
/// analyses consult for variable metadata.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Holds all functions declared in the module.
    pub funcs: PrimaryMap<FuncRef, Function>,

    /// Holds all variables of the module, globals and locals alike.
    pub vars: PrimaryMap<VarRef, VarData>,

    /// The designated entry point of the program, if any.
    pub entry: Option<FuncRef>,

    pub(crate) func_names: IndexMap<String, FuncRef>,
}

impl Module {
    /// Iterates over the functions in declaration order.
    pub fn iter_functions(&self) -> impl Iterator<Item = FuncRef> {
        self.funcs.keys()
    }

    pub fn func(&self, func_ref: FuncRef) -> &Function {
        &self.funcs[func_ref]
    }

    /// Returns `None` if `func_ref` is not a function of this module.
    pub fn get_func(&self, func_ref: FuncRef) -> Option<&Function> {
        self.funcs.get(func_ref)
    }

    pub fn func_name(&self, func_ref: FuncRef) -> &str {
        self.funcs[func_ref].name()
    }

    pub fn body(&self, func_ref: FuncRef) -> Option<&Body> {
        self.funcs.get(func_ref).and_then(Function::body)
    }

    pub fn lookup_func(&self, name: &str) -> Option<FuncRef> {
        self.func_names.get(name).copied()
    }

    pub fn var(&self, var: VarRef) -> &VarData {
        &self.vars[var]
    }

    pub fn var_name(&self, var: VarRef) -> &str {
        &self.vars[var].name
    }

    pub fn globals(&self) -> impl Iterator<Item = VarRef> + '_ {
        self.vars
            .iter()
            .filter_map(|(var, data)| data.is_global().then_some(var))
    }

    /// Returns `true` if the function has external linkage.
    pub fn is_external(&self, func_ref: FuncRef) -> bool {
        self.funcs[func_ref].sig.linkage().is_external()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "func");
