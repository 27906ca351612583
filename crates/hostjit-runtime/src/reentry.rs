//! Re-entry from compiled code
//!
//! Compiled code reaches a host function in two hops. It first calls
//! [`hostjit_crosscall`] with a wrapper, the call record and the scheduling
//! context. The wrapper then recovers the target code address from the record
//! and calls [`enter_managed`], which looks the address up and runs the host
//! function on the record.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use hostjit_sdk::FrameLayout;

use crate::error::RuntimeError;
use crate::state::{runtime, RuntimeState};

/// Callback handed to the cross-call entry point
pub type CallWrapper = extern "C" fn(record: *mut u8, size: i32, ctxt: usize);

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static FAULT: RefCell<Option<RuntimeError>> = const { RefCell::new(None) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Number of cross-calls currently active on this thread
pub fn reentry_depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Take the fault recorded by the last failed call on this thread
pub fn take_fault() -> Option<RuntimeError> {
    FAULT.with(|f| f.borrow_mut().take())
}

/// Put back a fault taken with [`take_fault`] so the caller that owns it
/// still sees it. Does nothing if another fault is already pending.
pub fn restore_fault(fault: RuntimeError) {
    FAULT.with(|f| {
        let mut slot = f.borrow_mut();
        if slot.is_none() {
            *slot = Some(fault);
        }
    });
}

fn record_fault(fault: RuntimeError) {
    tracing::error!(target: "hostjit::runtime", "{}", fault);
    FAULT.with(|f| *f.borrow_mut() = Some(fault));
}

/// Zero the parameter and return region of a record
unsafe fn clear_values(record: *mut u8, size: usize) {
    if size >= hostjit_sdk::CODE_SLOT_SIZE {
        std::ptr::write_bytes(record, 0, FrameLayout::code_offset_for(size));
    }
}

// ============================================================================
// Exported entry points
// ============================================================================

/// Readiness gate target: block until the process runtime is initialized and
/// return the calling thread's scheduling context.
pub extern "C" fn hostjit_wait_runtime_init_done() -> usize {
    runtime().wait_ready()
}

/// Cross-call target: re-enter the process runtime.
///
/// # Safety
///
/// `record` must be valid for `size` bytes and `wrapper` must accept it.
pub unsafe extern "C" fn hostjit_crosscall(wrapper: CallWrapper, record: *mut u8, size: i32, ctxt: usize) {
    runtime().crosscall(wrapper, record, size, ctxt)
}

impl RuntimeState {
    /// Re-enter this runtime from compiled code.
    ///
    /// A context this runtime did not hand to the calling thread is rejected
    /// and the wrapper is not called.
    ///
    /// # Safety
    ///
    /// `record` must be valid for `size` bytes and `wrapper` must accept it.
    pub unsafe fn crosscall(&self, wrapper: CallWrapper, record: *mut u8, size: i32, ctxt: usize) {
        if !self.is_current_context(ctxt) {
            record_fault(RuntimeError::UnknownContext(ctxt));
            clear_values(record, size.max(0) as usize);
            return;
        }
        let _depth = DepthGuard::enter();
        tracing::trace!(
            target: "hostjit::runtime",
            "crosscall record={:p} size={} ctxt={:#x} depth={}",
            record,
            size,
            ctxt,
            reentry_depth()
        );
        wrapper(record, size, ctxt);
    }

    /// Run the host function registered at `entry` on a call record.
    ///
    /// # Safety
    ///
    /// `record` must be valid for `size` bytes.
    pub unsafe fn enter_managed(&self, entry: *const u8, record: *mut u8, size: usize, _ctxt: usize) {
        let Some(target) = self.entries().get(entry) else {
            record_fault(RuntimeError::UnknownEntry(entry as usize));
            clear_values(record, size);
            return;
        };

        if target.frame_size != size {
            tracing::warn!(
                target: "hostjit::runtime",
                "skipping {}: record is {} bytes, function expects {}",
                target.name,
                size,
                target.frame_size
            );
            clear_values(record, size);
            return;
        }

        let invoker = target.invoker;
        let result = panic::catch_unwind(AssertUnwindSafe(|| invoker(entry, record)));
        match result {
            Ok(()) => self.record_call(),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                clear_values(record, size);
                record_fault(RuntimeError::HostPanic {
                    function: target.name,
                    message,
                });
            }
        }
    }
}

/// Enter managed code from foreign code on the process runtime.
///
/// # Safety
///
/// `record` must be valid for `size` bytes.
pub unsafe fn enter_managed(entry: *const u8, record: *mut u8, size: usize, ctxt: usize) {
    runtime().enter_managed(entry, record, size, ctxt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostjit_sdk::{HostFunc, HostValue};

    fn mul(a: i64, b: i64) -> i64 {
        a * b
    }

    fn depth() -> u64 {
        reentry_depth() as u64
    }

    fn boom(_: i64) -> i64 {
        panic!("boom");
    }

    extern "C" fn test_wrapper(record: *mut u8, size: i32, ctxt: usize) {
        let size = size as usize;
        unsafe {
            let entry = <*const u8 as HostValue>::read_frame(record, FrameLayout::code_offset_for(size));
            enter_managed(entry, record, size, ctxt);
        }
    }

    fn frame_for(func: &HostFunc) -> (FrameLayout, Vec<u8>) {
        let layout = func.signature().layout();
        let mut frame = vec![0u8; layout.size()];
        unsafe { func.code().write_frame(frame.as_mut_ptr(), layout.code_offset()) };
        (layout, frame)
    }

    #[test]
    fn test_crosscall_runs_host_function() {
        let f = HostFunc::new(mul as fn(_, _) -> _);
        runtime().entries().register_func(&f).unwrap();
        runtime().start();
        let ctxt = hostjit_wait_runtime_init_done();

        let (layout, mut frame) = frame_for(&f);
        unsafe {
            6i64.write_frame(frame.as_mut_ptr(), layout.param_offsets()[0]);
            9i64.write_frame(frame.as_mut_ptr(), layout.param_offsets()[1]);
            hostjit_crosscall(test_wrapper, frame.as_mut_ptr(), layout.size() as i32, ctxt);
            assert_eq!(i64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 54);
        }
        assert!(take_fault().is_none());
    }

    #[test]
    fn test_depth_visible_inside_host_function() {
        let f = HostFunc::new(depth as fn() -> _);
        runtime().entries().register_func(&f).unwrap();
        runtime().start();
        let ctxt = hostjit_wait_runtime_init_done();

        let (layout, mut frame) = frame_for(&f);
        unsafe {
            hostjit_crosscall(test_wrapper, frame.as_mut_ptr(), layout.size() as i32, ctxt);
            assert_eq!(u64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 1);
        }
        assert_eq!(reentry_depth(), 0);
    }

    #[test]
    fn test_panic_is_recorded_not_unwound() {
        let f = HostFunc::new(boom as fn(_) -> _).with_name("boom");
        runtime().entries().register_func(&f).unwrap();
        runtime().start();
        let ctxt = hostjit_wait_runtime_init_done();

        let (layout, mut frame) = frame_for(&f);
        unsafe {
            1i64.write_frame(frame.as_mut_ptr(), 0);
            hostjit_crosscall(test_wrapper, frame.as_mut_ptr(), layout.size() as i32, ctxt);
            assert_eq!(i64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 0);
        }
        match take_fault() {
            Some(RuntimeError::HostPanic { function, message }) => {
                assert_eq!(function, "boom");
                assert_eq!(message, "boom");
            }
            other => panic!("expected host panic, got {:?}", other),
        }
        assert!(take_fault().is_none());
    }

    #[test]
    fn test_restore_fault_fills_empty_slot_only() {
        assert!(take_fault().is_none());
        restore_fault(RuntimeError::UnknownEntry(1));
        assert_eq!(take_fault(), Some(RuntimeError::UnknownEntry(1)));

        record_fault(RuntimeError::UnknownEntry(2));
        restore_fault(RuntimeError::UnknownEntry(1));
        assert_eq!(take_fault(), Some(RuntimeError::UnknownEntry(2)));
        assert!(take_fault().is_none());
    }

    #[test]
    fn test_unknown_context_skips_call() {
        let f = HostFunc::new(mul as fn(_, _) -> _);
        runtime().entries().register_func(&f).unwrap();
        runtime().start();

        let (layout, mut frame) = frame_for(&f);
        unsafe {
            3i64.write_frame(frame.as_mut_ptr(), 0);
            hostjit_crosscall(test_wrapper, frame.as_mut_ptr(), layout.size() as i32, 0);
            assert_eq!(i64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 0);
        }
        assert_eq!(take_fault(), Some(RuntimeError::UnknownContext(0)));
    }

    #[test]
    fn test_size_mismatch_skips_call() {
        let f = HostFunc::new(mul as fn(_, _) -> _);
        runtime().entries().register_func(&f).unwrap();
        runtime().start();
        let ctxt = hostjit_wait_runtime_init_done();

        // Record built for a signature with the second parameter dropped
        let short = FrameLayout::from_sizes([8], [8]);
        let mut frame = vec![0xaau8; short.size()];
        unsafe {
            f.code().write_frame(frame.as_mut_ptr(), short.code_offset());
            hostjit_crosscall(test_wrapper, frame.as_mut_ptr(), short.size() as i32, ctxt);
            assert_eq!(i64::read_frame(frame.as_ptr(), short.return_offsets()[0]), 0);
        }
        assert!(take_fault().is_none());
    }
}
