//! Host function entry resolution

use hostjit_sdk::HostFunc;

/// Turns a host function handle into the code address stored in call
/// records and used as the runtime's lookup key
pub trait EntryPointResolver: Send + Sync {
    fn resolve(&self, func: &HostFunc) -> *const u8;
}

/// Reads the first machine word of the handle, where `HostFunc` keeps its
/// code address
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstWordResolver;

impl EntryPointResolver for FirstWordResolver {
    fn resolve(&self, func: &HostFunc) -> *const u8 {
        // SAFETY: HostFunc is repr(C) with the code pointer as its first field
        unsafe { *(func as *const HostFunc as *const *const u8) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neg(x: i32) -> i32 {
        -x
    }

    #[test]
    fn test_first_word_is_code() {
        let f = HostFunc::new(neg as fn(i32) -> i32);
        assert_eq!(FirstWordResolver.resolve(&f), f.code());
        assert_eq!(f.code(), (neg as fn(i32) -> i32) as *const u8);
    }
}
