//! hostjit engine - a Cranelift-backed JIT builder whose functions can call
//! back into the host
//!
//! Functions are built instruction by instruction on a [`Function`] created
//! from a [`Context`], compiled with [`Function::compile`] and run with
//! [`Function::run`]. While a function is under construction,
//! [`Function::bridge_call`] emits a call to any [`HostFunc`]: arguments are
//! marshaled into a call record, the host runtime is re-entered and the
//! results come back as typed values.
//!
//! # Example
//!
//! ```ignore
//! use hostjit_engine::{Context, HostFunc, RunValue, Type};
//!
//! fn mul(a: i64, b: i64) -> i64 {
//!     a * b
//! }
//!
//! let ctx = Context::new()?;
//! let mut f = ctx.create_function(&[Type::Long, Type::Long], Type::Long)?;
//! let (a, b) = (f.param(0).unwrap(), f.param(1).unwrap());
//! let product = f.bridge_call(&HostFunc::new(mul as fn(_, _) -> _), &[a, b])?;
//! f.ret(Some(&product[0]))?;
//! f.compile()?;
//! assert_eq!(f.run(&[7i64.into(), 8i64.into()])?, RunValue::Int(56));
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod jit;

pub use bridge::{BridgeError, EntryPointResolver, FirstWordResolver};
pub use config::{max_optimization_level, ContextConfig, OptLevel, UnclassifiedPolicy};
pub use error::{JitError, JitResult};
pub use jit::{labels_equal, Context, Function, Label, RunValue, Type, Value, ValueKind};

pub use hostjit_sdk::{HostDyn, HostFunc, HostSignature, HostStr, HostType};
