//! Entry table: code addresses the runtime knows how to call

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hostjit_sdk::{FrameInvoker, HostFunc};

use crate::error::RuntimeError;

/// How to call one host function from a frame
#[derive(Debug, Clone, Copy)]
pub struct EntryRecord {
    /// Frame invoker monomorphized for the function's signature
    pub invoker: FrameInvoker,
    /// Frame size the invoker expects
    pub frame_size: usize,
    /// Diagnostic name
    pub name: &'static str,
}

/// Map from code address to [`EntryRecord`]
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: DashMap<usize, EntryRecord>,
}

impl EntryTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code address.
    ///
    /// Registering the same address again with the same invoker and frame
    /// size is a no-op apart from the name. Anything else is rejected, since
    /// functions compiled against the first record may still call it.
    pub fn register(
        &self,
        code: *const u8,
        invoker: FrameInvoker,
        frame_size: usize,
        name: &'static str,
    ) -> Result<(), RuntimeError> {
        let record = EntryRecord {
            invoker,
            frame_size,
            name,
        };
        match self.entries.entry(code as usize) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                let previous = *slot.get();
                if previous.invoker as usize != invoker as usize || previous.frame_size != frame_size {
                    tracing::warn!(
                        target: "hostjit::runtime",
                        "refusing to re-register {:p} as {}: already bound to {}",
                        code,
                        name,
                        previous.name
                    );
                    return Err(RuntimeError::EntryConflict {
                        address: code as usize,
                        existing: previous.name,
                        name,
                    });
                }
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Register a host function under its own code address
    pub fn register_func(&self, func: &HostFunc) -> Result<(), RuntimeError> {
        self.register(
            func.code(),
            func.invoker(),
            func.signature().layout().size(),
            func.name(),
        )
    }

    /// Look up a code address
    pub fn get(&self, code: *const u8) -> Option<EntryRecord> {
        self.entries.get(&(code as usize)).map(|r| *r)
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    #[test]
    fn test_register_and_lookup() {
        let table = EntryTable::new();
        let f = HostFunc::new(add as fn(_, _) -> _).with_name("add");
        assert!(table.get(f.code()).is_none());

        table.register_func(&f).unwrap();
        let record = table.get(f.code()).unwrap();
        assert_eq!(record.frame_size, f.signature().layout().size());
        assert_eq!(record.name, "add");
        assert_eq!(table.len(), 1);
    }

    fn sub(a: i32, b: i32) -> i32 {
        a - b
    }

    unsafe fn zero_invoker(_code: *const u8, _frame: *mut u8) {}

    #[test]
    fn test_reregister_same_shape_renames() {
        let table = EntryTable::new();
        let f = HostFunc::new(add as fn(_, _) -> _);
        let size = f.signature().layout().size();
        table.register(f.code(), f.invoker(), size, "first").unwrap();
        table.register(f.code(), f.invoker(), size, "second").unwrap();
        let record = table.get(f.code()).unwrap();
        assert_eq!(record.name, "second");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reregister_with_other_shape_rejected() {
        let table = EntryTable::new();
        let f = HostFunc::new(add as fn(_, _) -> _).with_name("add");
        table.register_func(&f).unwrap();

        let err = table.register(f.code(), f.invoker(), 4, "short").unwrap_err();
        assert_eq!(
            err,
            RuntimeError::EntryConflict {
                address: f.code() as usize,
                existing: "add",
                name: "short",
            }
        );

        let size = f.signature().layout().size();
        assert!(table.register(f.code(), zero_invoker, size, "zero").is_err());

        let record = table.get(f.code()).unwrap();
        assert_eq!(record.name, "add");
        assert_eq!(record.invoker as usize, f.invoker() as usize);
    }

    #[test]
    fn test_distinct_functions_coexist() {
        let table = EntryTable::new();
        table.register_func(&HostFunc::new(add as fn(_, _) -> _)).unwrap();
        table.register_func(&HostFunc::new(sub as fn(_, _) -> _)).unwrap();
        assert_eq!(table.len(), 2);
    }
}
