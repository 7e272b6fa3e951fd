use cranelift_entity::entity_impl;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::{module::FuncRef, var::VarRef};

/// An instruction handle. The index of an instruction is its location number
/// in the owning body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstId(u32);
entity_impl!(InstId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstData {
    /// No-op.
    Skip,

    Assign {
        lhs: VarRef,
        rhs: Expr,
    },

    /// Start of the lifetime of a local.
    Decl(VarRef),

    /// End of the lifetime of a local.
    Dead(VarRef),

    /// Jumps to `dest`. A conditional goto may also fall through to the next
    /// instruction.
    Goto {
        cond: Option<Expr>,
        dest: InstId,
    },

    Call {
        lhs: Option<VarRef>,
        target: CallTarget,
        args: SmallVec<[Expr; 4]>,
    },

    /// Writes `value` to the memory `ptr` points to.
    Store {
        ptr: Expr,
        value: Expr,
    },

    /// Writes the return slot of the function (if any) and transfers the
    /// control to the end of the function.
    Return(Option<Expr>),

    /// Spawns a thread starting at `dest`; the current thread continues at the
    /// next instruction.
    StartThread(InstId),

    EndThread,

    /// The unique exit of a body. Always the last instruction.
    EndFunction,
}

impl InstData {
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    pub fn is_end_function(&self) -> bool {
        matches!(self, Self::EndFunction)
    }

    pub fn call_target(&self) -> Option<&CallTarget> {
        match self {
            Self::Call { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Returns the variable written by the instruction.
    pub fn def(&self) -> Option<VarRef> {
        match self {
            Self::Assign { lhs, .. } => Some(*lhs),
            Self::Decl(var) => Some(*var),
            Self::Call { lhs, .. } => *lhs,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Eq,
    Lt,
    Not,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Eq => "==",
            Self::Lt => "<",
            Self::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(VarRef),
    Const(i64),
    /// An arbitrary value.
    Nondet,
    Op(Op, Vec<Expr>),
    /// The address of a variable.
    AddressOf(VarRef),
    /// The value stored at the address `expr` evaluates to.
    Deref(Box<Expr>),
}

impl Expr {
    pub fn var(var: VarRef) -> Self {
        Self::Var(var)
    }

    pub fn binary(op: Op, lhs: Expr, rhs: Expr) -> Self {
        Self::Op(op, vec![lhs, rhs])
    }

    pub fn deref(expr: Expr) -> Self {
        Self::Deref(Box::new(expr))
    }

    /// Collects the variables whose value the expression reads. Taking the
    /// address of a variable doesn't read it.
    pub fn vars(&self) -> SmallVec<[VarRef; 4]> {
        let mut vars = SmallVec::new();
        self.collect_vars(&mut vars);
        vars
    }

    fn collect_vars(&self, vars: &mut SmallVec<[VarRef; 4]>) {
        match self {
            Self::Var(var) => {
                if !vars.contains(var) {
                    vars.push(*var)
                }
            }
            Self::Const(_) | Self::Nondet | Self::AddressOf(_) => {}
            Self::Op(_, args) => args.iter().for_each(|arg| arg.collect_vars(vars)),
            Self::Deref(ptr) => ptr.collect_vars(vars),
        }
    }
}

impl From<VarRef> for Expr {
    fn from(var: VarRef) -> Self {
        Self::Var(var)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Const(value)
    }
}

/// The function designator of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Direct(FuncRef),

    /// A dispatch that is still undecided between two targets.
    If {
        cond: Expr,
        then: Box<CallTarget>,
        else_: Box<CallTarget>,
    },

    Deref(Expr),
    Member(Expr, String),
    Index(Expr, Expr),
    NullObject,

    /// A designator kind that should have been lowered before analysis, e.g. a
    /// virtual method reference.
    Unlowered(String),
}

impl CallTarget {
    pub fn direct_callee(&self) -> Option<FuncRef> {
        match self {
            Self::Direct(func) => Some(*func),
            _ => None,
        }
    }

    /// Returns every function the target may designate, i.e. the direct
    /// callees in both branches of a conditional target.
    pub fn callees(&self) -> SmallVec<[FuncRef; 2]> {
        match self {
            Self::Direct(func) => smallvec![*func],
            Self::If { then, else_, .. } => {
                let mut callees = then.callees();
                for callee in else_.callees() {
                    if !callees.contains(&callee) {
                        callees.push(callee);
                    }
                }
                callees
            }
            _ => SmallVec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Direct(_) => "symbol",
            Self::If { .. } => "if",
            Self::Deref(_) => "dereference",
            Self::Member(..) => "member",
            Self::Index(..) => "index",
            Self::NullObject => "NULL-object",
            Self::Unlowered(kind) => kind,
        }
    }
}
