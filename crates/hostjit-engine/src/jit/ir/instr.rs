//! Recorded instructions
//!
//! A function body is a linear list of instructions. Control flow is expressed
//! with labels placed in the list and branches to them; the lowering pass
//! turns every placed label into a basic block.

use cranelift_module::FuncId;

use crate::jit::types::Type;
use crate::jit::value::{Label, ValueId, ValueKind};

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    /// Shift left
    Shl,
    /// Shift right, arithmetic for signed operands
    Shr,
    /// Logical shift right
    Ushr,
    /// Arithmetic shift right
    Sshr,
    Min,
    Max,
}

impl BinaryOp {
    /// Only defined on integers
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::Ushr
                | BinaryOp::Sshr
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::Ushr => "ushr",
            BinaryOp::Sshr => "sshr",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sqrt,
    Floor,
    Ceil,
    Trunc,
    /// Round to nearest, ties to even
    Round,
    /// 1 if non-zero
    ToBool,
    /// 1 if zero
    ToNotBool,
}

impl UnaryOp {
    /// Only defined on floats
    pub fn is_float_only(&self) -> bool {
        matches!(
            self,
            UnaryOp::Sqrt | UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Trunc | UnaryOp::Round
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Trunc => "trunc",
            UnaryOp::Round => "round",
            UnaryOp::ToBool => "to_bool",
            UnaryOp::ToNotBool => "to_not_bool",
        }
    }
}

/// Comparisons; the result is an `int` holding 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        }
    }
}

/// Stubs wired once per context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubKind {
    /// Runtime readiness gate
    Gate,
    /// Cross-call trampoline
    Crosscall,
}

/// What a call instruction calls
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Another function of the same context
    Function(FuncId),
    /// A fixed native address
    Native { name: String, address: usize },
    /// An address held in a value
    Indirect(ValueId),
    /// A per-context stub
    Stub(StubKind),
}

/// One recorded instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ===== Arithmetic =====
    Binary {
        op: BinaryOp,
        dest: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        op: UnaryOp,
        dest: ValueId,
        operand: ValueId,
    },
    Compare {
        op: CompareOp,
        dest: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Convert {
        dest: ValueId,
        src: ValueId,
    },

    // ===== Memory =====
    Copy {
        dest: ValueId,
        src: ValueId,
    },
    AddressOf {
        dest: ValueId,
        src: ValueId,
    },
    LoadRelative {
        dest: ValueId,
        base: ValueId,
        offset: i32,
    },
    StoreRelative {
        base: ValueId,
        offset: i32,
        src: ValueId,
    },
    AddRelative {
        dest: ValueId,
        base: ValueId,
        offset: i32,
    },
    LoadElem {
        dest: ValueId,
        base: ValueId,
        index: ValueId,
        elem: Type,
    },
    LoadElemAddress {
        dest: ValueId,
        base: ValueId,
        index: ValueId,
        elem: Type,
    },
    StoreElem {
        base: ValueId,
        index: ValueId,
        src: ValueId,
    },

    // ===== Calls =====
    Call {
        dest: Option<ValueId>,
        target: CallTarget,
        signature: Type,
        args: Vec<ValueId>,
    },

    // ===== Control flow =====
    Label(Label),
    Branch(Label),
    BranchIf {
        cond: ValueId,
        target: Label,
    },
    BranchIfNot {
        cond: ValueId,
        target: Label,
    },
    /// `None` returns the zero value of the return type
    Return(Option<ValueId>),
}

impl Instr {
    /// Value defined by this instruction
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Instr::Binary { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::Compare { dest, .. }
            | Instr::Convert { dest, .. }
            | Instr::Copy { dest, .. }
            | Instr::AddressOf { dest, .. }
            | Instr::LoadRelative { dest, .. }
            | Instr::AddRelative { dest, .. }
            | Instr::LoadElem { dest, .. }
            | Instr::LoadElemAddress { dest, .. } => Some(*dest),
            Instr::Call { dest, .. } => *dest,
            _ => None,
        }
    }

    /// Ends the current block
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Branch(_) | Instr::Return(_))
    }
}

/// Per-value bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub ty: Type,
    pub kind: ValueKind,
    /// Its address has been taken; it must live in memory
    pub addressable: bool,
}

/// Everything recorded for one function
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub name: String,
    pub params: Vec<ValueId>,
    pub ret: Type,
    pub values: Vec<ValueInfo>,
    pub instrs: Vec<Instr>,
    pub num_labels: u32,
}

impl FunctionBody {
    pub fn new(name: String, ret: Type) -> Self {
        FunctionBody {
            name,
            params: Vec::new(),
            ret,
            values: Vec::new(),
            instrs: Vec::new(),
            num_labels: 0,
        }
    }

    /// Allocate a value
    pub fn alloc_value(&mut self, ty: Type, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            ty,
            kind,
            addressable: false,
        });
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueInfo {
        &mut self.values[id.0 as usize]
    }

    pub fn reserve_label(&mut self) -> Label {
        let label = Label(self.num_labels);
        self.num_labels += 1;
        label
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Number of recorded instructions, label placements excluded
    pub fn instr_count(&self) -> usize {
        self.instrs
            .iter()
            .filter(|i| !matches!(i, Instr::Label(_)))
            .count()
    }

    /// Whether `label` has been placed
    pub fn is_placed(&self, label: Label) -> bool {
        self.instrs.iter().any(|i| *i == Instr::Label(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_count() {
        let mut body = FunctionBody::new("f".to_string(), Type::Int);
        let a = body.alloc_value(Type::Int, ValueKind::Parameter(0));
        let b = body.alloc_value(Type::Int, ValueKind::Temporary);
        assert_eq!(a, ValueId(0));
        assert_eq!(b, ValueId(1));

        let l = body.reserve_label();
        body.push(Instr::Label(l));
        body.push(Instr::Unary {
            op: UnaryOp::Neg,
            dest: b,
            operand: a,
        });
        body.push(Instr::Return(Some(b)));
        assert_eq!(body.instr_count(), 2);
        assert!(body.is_placed(l));
        assert_eq!(body.instrs[1].dest(), Some(b));
        assert!(body.instrs[2].is_terminator());
    }
}
