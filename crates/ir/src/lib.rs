pub mod body;
pub mod builder;
pub mod function;
pub mod inst;
pub mod ir_writer;
pub mod linkage;
pub mod module;
pub mod var;

pub use body::{Body, Successor};
pub use builder::{BuildError, FunctionBuilder, Label, ModuleBuilder};
pub use function::{Function, Signature};
pub use inst::{CallTarget, Expr, InstData, InstId, Op};
pub use linkage::Linkage;
pub use module::{FuncRef, Module};
pub use var::{Scope, VarData, VarRef};
