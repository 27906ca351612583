//! Host-side call wrapper
//!
//! The cross-call trampoline invokes this with the raw record. It recovers
//! the host function's code address from the record's last slot and hands
//! over to the runtime.

use hostjit_sdk::{FrameLayout, CODE_SLOT_SIZE};

/// Wrapper passed to `hostjit_crosscall` by every bridge call
pub extern "C" fn bridge_wrapper(record: *mut u8, size: i32, ctxt: usize) {
    if record.is_null() || size < CODE_SLOT_SIZE as i32 {
        tracing::warn!(target: "hostjit::bridge", size, "call record too small; call skipped");
        return;
    }
    let size = size as usize;
    // SAFETY: the record holds at least the code slot, written last by the
    // emitted code at this offset
    unsafe {
        let entry = std::ptr::read_unaligned(record.add(FrameLayout::code_offset_for(size)) as *const *const u8);
        hostjit_runtime::enter_managed(entry, record, size, ctxt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostjit_runtime::{runtime, start, take_fault, RuntimeError};
    use hostjit_sdk::HostFunc;

    fn square(x: i64) -> i64 {
        x * x
    }

    #[test]
    fn test_wrapper_dispatches_by_code_slot() {
        start();
        let func = HostFunc::new(square as fn(i64) -> i64);
        runtime().entries().register_func(&func).unwrap();

        let layout = func.signature().layout();
        let mut record = vec![0u8; layout.size()];
        unsafe {
            std::ptr::write_unaligned(record.as_mut_ptr() as *mut i64, 12);
            std::ptr::write_unaligned(
                record.as_mut_ptr().add(layout.code_offset()) as *mut *const u8,
                func.code(),
            );
        }
        bridge_wrapper(record.as_mut_ptr(), layout.size() as i32, 0);
        let out = unsafe { std::ptr::read_unaligned(record.as_ptr().add(layout.return_offsets()[0]) as *const i64) };
        assert_eq!(out, 144);
        assert!(take_fault().is_none());
    }

    #[test]
    fn test_wrapper_unknown_entry() {
        start();
        let mut record = vec![0xaau8; 16];
        unsafe {
            std::ptr::write_unaligned(record.as_mut_ptr().add(8) as *mut usize, 0x10);
        }
        bridge_wrapper(record.as_mut_ptr(), 16, 0);
        assert_eq!(take_fault(), Some(RuntimeError::UnknownEntry(0x10)));
        assert!(record[..8].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_wrapper_ignores_tiny_records() {
        let mut byte = 0u8;
        bridge_wrapper(&mut byte, 1, 0);
        assert!(take_fault().is_none());
    }
}
