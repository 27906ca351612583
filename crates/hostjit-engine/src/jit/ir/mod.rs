//! Recorded IR of functions under construction

pub mod display;
pub mod instr;

pub use instr::{
    BinaryOp, CallTarget, CompareOp, FunctionBody, Instr, StubKind, UnaryOp, ValueInfo,
};
