//! hostjit SDK - host-side types for functions called from compiled code
//!
//! This crate describes host functions to the bridge in `hostjit-engine`
//! without depending on the engine or on any runtime state. A host function
//! is an ordinary Rust function whose parameters and results implement
//! [`HostValue`]; [`HostFunc::new`] reflects its signature at compile time.
//!
//! # Example
//!
//! ```ignore
//! use hostjit_sdk::HostFunc;
//!
//! fn mul(a: i64, b: i64) -> i64 {
//!     a * b
//! }
//!
//! let f = HostFunc::new(mul as fn(_, _) -> _);
//! assert_eq!(f.signature().to_string(), "func(int64, int64) int64");
//! ```

#![warn(missing_docs)]

mod error;
mod frame;
mod func;
mod types;
mod value;

pub use error::{HostError, HostResult};
pub use frame::{FrameLayout, CODE_SLOT_SIZE};
pub use func::{FrameInvoker, HostFunc, HostReturn, HostSignature, IntoHostFunc};
pub use types::{HostType, WORD_SIZE};
pub use value::{opaque, HostDyn, HostStr, HostValue, TypeDesc};
