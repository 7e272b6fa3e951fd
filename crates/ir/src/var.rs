use cranelift_entity::entity_impl;
use serde::{Deserialize, Serialize};

use crate::module::FuncRef;

/// A symbol of the module, i.e. a global variable or a local variable of a
/// function (parameters and return slots included).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarRef(u32);
entity_impl!(VarRef, "var");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarData {
    pub name: String,
    pub scope: Scope,

    /// `true` if the variable may be accessed by more than one thread.
    /// Globals are always treated as shared.
    pub shared: bool,
}

impl VarData {
    pub fn global(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope: Scope::Global,
            shared: true,
        }
    }

    pub fn local(name: &str, func: FuncRef) -> Self {
        Self {
            name: name.to_string(),
            scope: Scope::Local(func),
            shared: false,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self.scope, Scope::Global)
    }

    pub fn is_local(&self) -> bool {
        !self.is_global()
    }

    pub fn is_shared(&self) -> bool {
        self.shared || self.is_global()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Local(FuncRef),
}
