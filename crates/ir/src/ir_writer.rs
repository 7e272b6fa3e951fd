use std::io;

use crate::{
    inst::{CallTarget, Expr, InstData, InstId},
    module::{FuncRef, Module},
    var::VarRef,
    Function,
};

pub struct ModuleWriter<'a> {
    module: &'a Module,
}

impl<'a> ModuleWriter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        // Write module level variables.
        for var in self.module.globals() {
            let data = self.module.var(var);
            writeln!(w, "global %{};", data.name)?;
        }
        if self.module.globals().next().is_some() {
            writeln!(w)?;
        }

        for func_ref in self.module.funcs.keys() {
            let mut func_writer = FuncWriter::new(self.module, func_ref);
            func_writer.write(&mut w)?;
            writeln!(w)?;
        }

        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub struct FuncWriter<'a> {
    pub(crate) module: &'a Module,
    pub(crate) func_ref: FuncRef,
    level: u8,
}

impl<'a> FuncWriter<'a> {
    pub fn new(module: &'a Module, func_ref: FuncRef) -> Self {
        Self {
            module,
            func_ref,
            level: 0,
        }
    }

    pub fn func(&self) -> &'a Function {
        &self.module.funcs[self.func_ref]
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        let func = self.func();
        write!(w, "func {} %{}(", func.sig.linkage(), func.name())?;
        self.write_iter_with_delim(func.params.iter().copied(), ", ", &mut w)?;
        write!(w, ")")?;

        let Some(body) = func.body() else {
            return writeln!(w, ";");
        };

        writeln!(w, " {{")?;
        self.level += 1;
        for (inst, data) in body.iter() {
            self.indent(&mut w)?;
            write!(w, "{}: ", inst.as_u32())?;
            data.write(self, &mut w)?;
            writeln!(w, ";")?;
        }
        self.level -= 1;
        writeln!(w, "}}")?;

        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Renders a single instruction of the function without a terminator.
    pub fn inst_string(&self, inst: InstId) -> io::Result<String> {
        let Some(body) = self.func().body() else {
            return Ok(String::new());
        };

        let mut s = Vec::new();
        body.inst(inst).write(self, &mut s)?;
        String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    pub fn write_iter_with_delim<T>(
        &self,
        iter: impl Iterator<Item = T>,
        delim: &str,
        mut w: impl io::Write,
    ) -> io::Result<()>
    where
        T: IrWrite,
    {
        let mut iter = iter.peekable();
        while let Some(item) = iter.next() {
            item.write(self, &mut w)?;
            if iter.peek().is_some() {
                w.write_all(delim.as_bytes())?;
            }
        }

        Ok(())
    }

    pub fn indent(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(" ".repeat(self.level as usize * 4).as_bytes())
    }
}

pub trait IrWrite {
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()>;
}

impl<T> IrWrite for &T
where
    T: IrWrite,
{
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()> {
        (*self).write(ctx, w)
    }
}

impl IrWrite for VarRef {
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "{}", ctx.module.var_name(*self))
    }
}

impl IrWrite for FuncRef {
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()> {
        match ctx.module.get_func(*self) {
            Some(func) => write!(w, "%{}", func.name()),
            None => write!(w, "%{}", self),
        }
    }
}

impl IrWrite for Expr {
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()> {
        match self {
            Self::Var(var) => var.write(ctx, w),
            Self::Const(value) => write!(w, "{value}"),
            Self::Nondet => write!(w, "nondet"),
            Self::Op(op, args) => match args.as_slice() {
                [arg] => {
                    write!(w, "{}", op.as_str())?;
                    arg.write(ctx, w)
                }
                _ => {
                    write!(w, "(")?;
                    let delim = format!(" {} ", op.as_str());
                    ctx.write_iter_with_delim(args.iter(), &delim, &mut *w)?;
                    write!(w, ")")
                }
            },
            Self::AddressOf(var) => {
                write!(w, "&")?;
                var.write(ctx, w)
            }
            Self::Deref(ptr) => {
                write!(w, "*")?;
                ptr.write(ctx, w)
            }
        }
    }
}

impl IrWrite for CallTarget {
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()> {
        match self {
            Self::Direct(func) => func.write(ctx, w),
            Self::If { cond, then, else_ } => {
                write!(w, "if ")?;
                cond.write(ctx, w)?;
                write!(w, " then ")?;
                then.write(ctx, w)?;
                write!(w, " else ")?;
                else_.write(ctx, w)
            }
            Self::Deref(pointer) => {
                write!(w, "*")?;
                pointer.write(ctx, w)
            }
            Self::Member(object, member) => {
                object.write(ctx, w)?;
                write!(w, ".{member}")
            }
            Self::Index(array, index) => {
                array.write(ctx, w)?;
                write!(w, "[")?;
                index.write(ctx, w)?;
                write!(w, "]")
            }
            Self::NullObject => write!(w, "NULL"),
            Self::Unlowered(kind) => write!(w, "<{kind}>"),
        }
    }
}

impl IrWrite for InstData {
    fn write(&self, ctx: &FuncWriter, w: &mut dyn io::Write) -> io::Result<()> {
        match self {
            Self::Skip => write!(w, "skip"),
            Self::Assign { lhs, rhs } => {
                lhs.write(ctx, w)?;
                write!(w, " = ")?;
                rhs.write(ctx, w)
            }
            Self::Decl(var) => {
                write!(w, "decl ")?;
                var.write(ctx, w)
            }
            Self::Dead(var) => {
                write!(w, "dead ")?;
                var.write(ctx, w)
            }
            Self::Goto { cond, dest } => {
                if let Some(cond) = cond {
                    write!(w, "if ")?;
                    cond.write(ctx, w)?;
                    write!(w, " ")?;
                }
                write!(w, "goto {}", dest.as_u32())
            }
            Self::Call { lhs, target, args } => {
                if let Some(lhs) = lhs {
                    lhs.write(ctx, w)?;
                    write!(w, " = ")?;
                }
                write!(w, "call ")?;
                target.write(ctx, w)?;
                write!(w, "(")?;
                ctx.write_iter_with_delim(args.iter(), ", ", &mut *w)?;
                write!(w, ")")
            }
            Self::Store { ptr, value } => {
                write!(w, "*")?;
                ptr.write(ctx, w)?;
                write!(w, " = ")?;
                value.write(ctx, w)
            }
            Self::Return(value) => {
                write!(w, "return")?;
                if let Some(value) = value {
                    write!(w, " ")?;
                    value.write(ctx, w)?;
                }
                Ok(())
            }
            Self::StartThread(dest) => write!(w, "start_thread {}", dest.as_u32()),
            Self::EndThread => write!(w, "end_thread"),
            Self::EndFunction => write!(w, "end_function"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::ModuleBuilder, Linkage, Op, Signature};

    #[test]
    fn write_module() {
        let mut builder = ModuleBuilder::new();
        let secret = builder.declare_global("secret");
        let source = builder
            .declare_function(Signature::new("source", Linkage::External))
            .unwrap();
        let main = builder
            .declare_function(Signature::new("main", Linkage::Public))
            .unwrap();

        let mut fb = builder.func_builder(main);
        let a = fb.param("a");
        let x = fb.local("x");
        let exit = fb.make_label();
        fb.decl(x);
        fb.call_direct(Some(x), source, [Expr::var(a)]);
        fb.goto_if(Expr::binary(Op::Lt, Expr::var(x), Expr::Const(3)), exit);
        fb.assign(secret, Expr::binary(Op::Add, Expr::var(x), Expr::var(a)));
        fb.store(Expr::AddressOf(x), Expr::deref(Expr::var(a)));
        fb.call(
            None,
            CallTarget::If {
                cond: Expr::Nondet,
                then: Box::new(CallTarget::Direct(source)),
                else_: Box::new(CallTarget::NullObject),
            },
            [],
        );
        fb.bind_label(exit);
        fb.ret(Some(Expr::var(x)));
        fb.finish().unwrap();

        let module = builder.build();
        let text = ModuleWriter::new(&module).dump_string().unwrap();
        insta::assert_snapshot!(text, @r"
        global %secret;

        func external %source();

        func public %main(a) {
            0: decl x;
            1: x = call %source(a);
            2: if (x < 3) goto 6;
            3: secret = (x + a);
            4: *&x = *a;
            5: call if nondet then %source else NULL();
            6: return x;
            7: end_function;
        }
        ");
    }
}
