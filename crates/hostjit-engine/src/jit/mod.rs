//! Native JIT: types, values, instruction emission and compilation

pub mod apply;
pub mod codegen;
pub mod context;
pub mod function;
pub mod ir;
pub mod lower;
pub mod types;
pub mod value;

pub use apply::RunValue;
pub use codegen::{TargetArch, TargetInfo};
pub use context::Context;
pub use function::Function;
pub use types::{Abi, Field, SignatureType, Type, TypeKind};
pub use value::{labels_equal, Const, Label, Value, ValueId, ValueKind};
