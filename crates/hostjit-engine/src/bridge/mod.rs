//! Managed-call bridge
//!
//! Lets compiled code call host functions. [`Function::bridge_call`]
//! classifies the host signature, lays out a call record, and emits the
//! gate and cross-call sequence that re-enters the host runtime.
//!
//! [`Function::bridge_call`]: crate::jit::Function::bridge_call

pub mod entry;
pub mod error;
mod marshal;
pub mod record;
pub mod signature;
pub mod stubs;
pub mod type_map;
pub mod wrapper;

pub use entry::{EntryPointResolver, FirstWordResolver};
pub use error::BridgeError;
pub use record::CallRecord;
pub use signature::BridgeSignature;
pub use stubs::ContextStubs;
pub use type_map::{dyn_type, map_host_type, string_type};
pub use wrapper::bridge_wrapper;
