//! hostjit runtime - the host side of the managed-call bridge
//!
//! Compiled code never calls a host function directly. It waits for the
//! runtime to be ready ([`hostjit_wait_runtime_init_done`]), then re-enters it
//! through [`hostjit_crosscall`], which tracks the re-entry and hands the
//! call record to an engine-provided wrapper. The wrapper finishes the job
//! with [`enter_managed`], which finds the host function by code address in
//! the [`EntryTable`] and runs it on the record.
//!
//! Host functions run under `catch_unwind`; a panic never crosses back into
//! compiled code and is reported by [`take_fault`] instead.

#![warn(missing_docs)]

mod entry;
mod error;
mod reentry;
mod state;

pub use entry::{EntryRecord, EntryTable};
pub use error::RuntimeError;
pub use reentry::{
    enter_managed, hostjit_crosscall, hostjit_wait_runtime_init_done, reentry_depth, restore_fault,
    take_fault, CallWrapper,
};
pub use state::{runtime, start, RuntimeState, RuntimeStats};
