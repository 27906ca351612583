//! Pretty-printing for recorded IR
//!
//! Display implementations behind `Function::dump`.

use std::fmt;

use super::instr::{CallTarget, FunctionBody, Instr, StubKind};
use crate::jit::value::ValueKind;

impl fmt::Display for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for (i, id) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} : {}", id, self.value(*id).ty)?;
        }
        writeln!(f, ") : {} {{", self.ret)?;

        for (i, info) in self.values.iter().enumerate() {
            match info.kind {
                ValueKind::Local => writeln!(f, "    local v{} : {}", i, info.ty)?,
                ValueKind::Constant(c) => writeln!(f, "    const v{} : {} = {}", i, info.ty, c)?,
                _ => {}
            }
        }

        for instr in &self.instrs {
            match instr {
                Instr::Label(_) => writeln!(f, "{}", instr)?,
                _ => writeln!(f, "    {}", instr)?,
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for StubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubKind::Gate => write!(f, "wait_runtime_init_done"),
            StubKind::Crosscall => write!(f, "crosscall"),
        }
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Function(id) => write!(f, "fn{}", id.as_u32()),
            CallTarget::Native { name, address } => write!(f, "{}@{:#x}", name, address),
            CallTarget::Indirect(v) => write!(f, "*{}", v),
            CallTarget::Stub(kind) => write!(f, "stub.{}", kind),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Binary { op, dest, lhs, rhs } => {
                write!(f, "{} = {} {}, {}", dest, op.mnemonic(), lhs, rhs)
            }
            Instr::Unary { op, dest, operand } => write!(f, "{} = {} {}", dest, op.mnemonic(), operand),
            Instr::Compare { op, dest, lhs, rhs } => {
                write!(f, "{} = {} {}, {}", dest, op.mnemonic(), lhs, rhs)
            }
            Instr::Convert { dest, src } => write!(f, "{} = convert {}", dest, src),
            Instr::Copy { dest, src } => write!(f, "{} = {}", dest, src),
            Instr::AddressOf { dest, src } => write!(f, "{} = address_of {}", dest, src),
            Instr::LoadRelative { dest, base, offset } => {
                write!(f, "{} = load_relative({}, {})", dest, base, offset)
            }
            Instr::StoreRelative { base, offset, src } => {
                write!(f, "store_relative({}, {}, {})", base, offset, src)
            }
            Instr::AddRelative { dest, base, offset } => {
                write!(f, "{} = add_relative({}, {})", dest, base, offset)
            }
            Instr::LoadElem { dest, base, index, elem } => {
                write!(f, "{} = load_elem({}, {}) : {}", dest, base, index, elem)
            }
            Instr::LoadElemAddress { dest, base, index, elem } => {
                write!(f, "{} = load_elem_address({}, {}) : {}", dest, base, index, elem)
            }
            Instr::StoreElem { base, index, src } => write!(f, "store_elem({}, {}, {})", base, index, src),
            Instr::Call { dest, target, signature, args } => {
                if let Some(dest) = dest {
                    write!(f, "{} = ", dest)?;
                }
                write!(f, "call {}(", target)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ") : {}", signature)
            }
            Instr::Label(label) => write!(f, ".{}:", label),
            Instr::Branch(label) => write!(f, "branch .{}", label),
            Instr::BranchIf { cond, target } => write!(f, "if {} then branch .{}", cond, target),
            Instr::BranchIfNot { cond, target } => write!(f, "if !{} then branch .{}", cond, target),
            Instr::Return(Some(v)) => write!(f, "return {}", v),
            Instr::Return(None) => write!(f, "return"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::instr::BinaryOp;
    use crate::jit::types::Type;

    #[test]
    fn test_display_body() {
        let mut body = FunctionBody::new("mul_add".to_string(), Type::Int);
        let x = body.alloc_value(Type::Int, ValueKind::Parameter(0));
        body.params.push(x);
        let c = body.alloc_value(Type::Int, ValueKind::Constant(crate::jit::value::Const::Int(3)));
        let t = body.alloc_value(Type::Int, ValueKind::Temporary);
        body.push(Instr::Binary {
            op: BinaryOp::Mul,
            dest: t,
            lhs: x,
            rhs: c,
        });
        body.push(Instr::Return(Some(t)));

        let text = body.to_string();
        assert!(text.starts_with("function mul_add(v0 : int) : int {"));
        assert!(text.contains("const v1 : int = 3"));
        assert!(text.contains("v2 = mul v0, v1"));
        assert!(text.contains("return v2"));
    }
}
