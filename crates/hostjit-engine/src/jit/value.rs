//! Values and labels of a function under construction

use std::fmt;

use super::types::Type;

/// Index of a value within its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Constant payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    /// Integer or pointer bits
    Int(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{}", v),
            Const::F32(v) => write!(f, "{:?}f", v),
            Const::F64(v) => write!(f, "{:?}", v),
        }
    }
}

/// How a value came to exist
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// Result of an instruction
    Temporary,
    /// Declared with `create_value`
    Local,
    /// Constant
    Constant(Const),
    /// Function parameter at this index
    Parameter(usize),
}

/// Handle to a value of a function under construction
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub(crate) owner: u64,
    pub(crate) id: ValueId,
    pub(crate) ty: Type,
    pub(crate) kind: ValueKind,
}

impl Value {
    /// Index within the owning function
    pub fn id(&self) -> ValueId {
        self.id
    }

    /// Native type
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Kind of value
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Produced by an instruction
    pub fn is_temporary(&self) -> bool {
        matches!(self.kind, ValueKind::Temporary)
    }

    /// Declared local
    pub fn is_local(&self) -> bool {
        matches!(self.kind, ValueKind::Local)
    }

    /// Constant
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_))
    }

    /// Function parameter
    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, ValueKind::Parameter(_))
    }

    /// Integer constant payload
    pub fn const_int(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Constant(Const::Int(v)) => Some(v),
            _ => None,
        }
    }

    /// Float constant payload, widened to f64
    pub fn const_float64(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Constant(Const::F64(v)) => Some(v),
            ValueKind::Constant(Const::F32(v)) => Some(v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Label index within its function
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Whether two labels name the same target
pub fn labels_equal(a: &Label, b: &Label) -> bool {
    a == b
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}
