use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use super::{BuildError, Label, ModuleBuilder};
use crate::{
    body::Body,
    inst::{CallTarget, Expr, InstData, InstId},
    module::FuncRef,
    var::{VarData, VarRef},
};

/// Appends instructions to the body of a declared function.
///
/// Jumps refer to [`Label`]s, which are resolved to instructions by
/// [`FunctionBuilder::finish`]. `finish` also appends the terminating
/// `EndFunction` instruction.
pub struct FunctionBuilder<'a> {
    module: &'a mut ModuleBuilder,
    func_ref: FuncRef,
    body: Body,
    labels: PrimaryMap<Label, Option<u32>>,
    fixups: Vec<(InstId, Label)>,
}

impl<'a> FunctionBuilder<'a> {
    pub(super) fn new(module: &'a mut ModuleBuilder, func_ref: FuncRef) -> Self {
        Self {
            module,
            func_ref,
            body: Body::new(),
            labels: PrimaryMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn func_ref(&self) -> FuncRef {
        self.func_ref
    }

    pub fn param(&mut self, name: &str) -> VarRef {
        let var = self.local(name);
        self.module.funcs[self.func_ref].params.push(var);
        var
    }

    pub fn local(&mut self, name: &str) -> VarRef {
        self.module.make_var(VarData::local(name, self.func_ref))
    }

    /// Declares a local that escapes to other threads.
    pub fn shared_local(&mut self, name: &str) -> VarRef {
        let mut data = VarData::local(name, self.func_ref);
        data.shared = true;
        self.module.make_var(data)
    }

    /// Returns the return slot of the function, declaring it on first use.
    pub fn ret_var(&mut self) -> VarRef {
        if let Some(var) = self.module.funcs[self.func_ref].ret_var {
            return var;
        }

        let name = format!("{}#return", self.module.funcs[self.func_ref].name());
        let var = self.local(&name);
        self.module.funcs[self.func_ref].ret_var = Some(var);
        var
    }

    pub fn make_label(&mut self) -> Label {
        self.labels.push(None)
    }

    /// Binds `label` to the next instruction to be inserted.
    pub fn bind_label(&mut self, label: Label) {
        self.labels[label] = Some(self.body.len() as u32);
    }

    pub fn skip(&mut self) -> InstId {
        self.body.push(InstData::Skip)
    }

    pub fn assign(&mut self, lhs: VarRef, rhs: impl Into<Expr>) -> InstId {
        self.body.push(InstData::Assign {
            lhs,
            rhs: rhs.into(),
        })
    }

    pub fn store(&mut self, ptr: impl Into<Expr>, value: impl Into<Expr>) -> InstId {
        self.body.push(InstData::Store {
            ptr: ptr.into(),
            value: value.into(),
        })
    }

    pub fn decl(&mut self, var: VarRef) -> InstId {
        self.body.push(InstData::Decl(var))
    }

    pub fn dead(&mut self, var: VarRef) -> InstId {
        self.body.push(InstData::Dead(var))
    }

    pub fn goto(&mut self, label: Label) -> InstId {
        self.push_jump(
            InstData::Goto {
                cond: None,
                dest: InstId::from_u32(0),
            },
            label,
        )
    }

    pub fn goto_if(&mut self, cond: impl Into<Expr>, label: Label) -> InstId {
        self.push_jump(
            InstData::Goto {
                cond: Some(cond.into()),
                dest: InstId::from_u32(0),
            },
            label,
        )
    }

    pub fn call(
        &mut self,
        lhs: Option<VarRef>,
        target: CallTarget,
        args: impl IntoIterator<Item = Expr>,
    ) -> InstId {
        self.body.push(InstData::Call {
            lhs,
            target,
            args: args.into_iter().collect::<SmallVec<_>>(),
        })
    }

    pub fn call_direct(
        &mut self,
        lhs: Option<VarRef>,
        callee: FuncRef,
        args: impl IntoIterator<Item = Expr>,
    ) -> InstId {
        self.call(lhs, CallTarget::Direct(callee), args)
    }

    /// Calls a function by name. The callee must already be declared.
    pub fn call_named(
        &mut self,
        lhs: Option<VarRef>,
        callee: &str,
        args: impl IntoIterator<Item = Expr>,
    ) -> Result<InstId, BuildError> {
        let callee = self
            .module
            .lookup_func(callee)
            .ok_or_else(|| BuildError::UndeclaredFunction(callee.to_string()))?;
        Ok(self.call_direct(lhs, callee, args))
    }

    pub fn ret(&mut self, value: Option<Expr>) -> InstId {
        if value.is_some() {
            self.ret_var();
        }
        self.body.push(InstData::Return(value))
    }

    pub fn start_thread(&mut self, label: Label) -> InstId {
        self.push_jump(InstData::StartThread(InstId::from_u32(0)), label)
    }

    pub fn end_thread(&mut self) -> InstId {
        self.body.push(InstData::EndThread)
    }

    /// Appends `EndFunction`, resolves labels and installs the body.
    pub fn finish(mut self) -> Result<FuncRef, BuildError> {
        let func = &self.module.funcs[self.func_ref];
        if !func.sig.linkage().has_definition() {
            return Err(BuildError::ExternalWithBody(func.name().to_string()));
        }
        if func.body.is_some() {
            return Err(BuildError::DuplicatedBody(func.name().to_string()));
        }

        self.body.push(InstData::EndFunction);

        for (inst, label) in std::mem::take(&mut self.fixups) {
            let dest = match self.labels[label] {
                Some(pos) => InstId::from_u32(pos),
                None => {
                    return Err(BuildError::UnboundLabel {
                        func: self.module.funcs[self.func_ref].name().to_string(),
                        label,
                    })
                }
            };

            match self.body.inst_mut(inst) {
                InstData::Goto { dest: slot, .. } | InstData::StartThread(slot) => *slot = dest,
                _ => unreachable!(),
            }
        }

        self.module.funcs[self.func_ref].body = Some(self.body);
        Ok(self.func_ref)
    }

    fn push_jump(&mut self, data: InstData, label: Label) -> InstId {
        let inst = self.body.push(data);
        self.fixups.push((inst, label));
        inst
    }
}
