use smallvec::SmallVec;

use crate::{body::Body, var::VarRef, Linkage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub sig: Signature,

    /// Parameters in declaration order.
    pub params: SmallVec<[VarRef; 4]>,

    /// The slot written by `return <expr>`. `None` if the function never
    /// returns a value.
    pub ret_var: Option<VarRef>,

    /// `None` for functions that are only declared.
    pub body: Option<Body>,
}

impl Function {
    pub fn new(sig: Signature) -> Self {
        Self {
            sig,
            params: SmallVec::new(),
            ret_var: None,
            body: None,
        }
    }

    pub fn name(&self) -> &str {
        self.sig.name()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn body_available(&self) -> bool {
        self.body.is_some()
    }

    pub fn param_index(&self, var: VarRef) -> Option<usize> {
        self.params.iter().position(|&param| param == var)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    /// Name of the function.
    name: String,

    /// Linkage of the function.
    linkage: Linkage,
}

impl Signature {
    pub fn new(name: &str, linkage: Linkage) -> Self {
        Self {
            name: name.to_string(),
            linkage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn update_linkage(&mut self, linkage: Linkage) {
        self.linkage = linkage;
    }
}
