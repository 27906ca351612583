//! Host values as they appear inside a call frame
//!
//! A call frame is a flat byte buffer. Every value a host function receives or
//! returns occupies `T::TYPE.size()` bytes at an offset that is the sum of the
//! sizes of the fields before it, with no alignment padding. All reads and
//! writes are therefore unaligned.

use std::any::{Any, TypeId};
use std::fmt;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{HostError, HostResult};
use crate::types::HostType;

// ============================================================================
// HostValue
// ============================================================================

/// A value that can be passed to or returned from a host function.
///
/// # Safety
///
/// `TYPE.size()` must equal `size_of::<Self>()` unless `read_frame` and
/// `write_frame` are overridden to touch exactly `TYPE.size()` bytes.
/// Every bit pattern written by compiled code for `TYPE` must be a valid
/// `Self` when read back through `read_frame`.
pub unsafe trait HostValue: Copy + 'static {
    /// Reflected type of the value
    const TYPE: HostType;

    /// Read a value out of a frame.
    ///
    /// # Safety
    ///
    /// `frame + offset` must be valid for reads of `TYPE.size()` bytes.
    unsafe fn read_frame(frame: *const u8, offset: usize) -> Self {
        std::ptr::read_unaligned(frame.add(offset) as *const Self)
    }

    /// Write the value into a frame.
    ///
    /// # Safety
    ///
    /// `frame + offset` must be valid for writes of `TYPE.size()` bytes.
    unsafe fn write_frame(self, frame: *mut u8, offset: usize) {
        std::ptr::write_unaligned(frame.add(offset) as *mut Self, self)
    }
}

macro_rules! impl_host_value {
    ($($t:ty => $kind:expr),* $(,)?) => {
        $(
            unsafe impl HostValue for $t {
                const TYPE: HostType = $kind;
            }
        )*
    };
}

impl_host_value! {
    i64 => HostType::Int64,
    u64 => HostType::Uint64,
    isize => HostType::Int,
    usize => HostType::Uint,
    i32 => HostType::Int32,
    u32 => HostType::Uint32,
    f32 => HostType::Float32,
    f64 => HostType::Float64,
    HostStr => HostType::Str,
    HostDyn => HostType::Dyn,
}

unsafe impl HostValue for bool {
    const TYPE: HostType = HostType::Bool;

    unsafe fn read_frame(frame: *const u8, offset: usize) -> Self {
        // Compiled code may store any non-zero byte for true
        *frame.add(offset) != 0
    }

    unsafe fn write_frame(self, frame: *mut u8, offset: usize) {
        *frame.add(offset) = self as u8;
    }
}

unsafe impl<T: 'static> HostValue for *const T {
    const TYPE: HostType = HostType::Pointer;
}

unsafe impl<T: 'static> HostValue for *mut T {
    const TYPE: HostType = HostType::Pointer;
}

/// Reflected type for a user value the bridge has no classification for.
///
/// Implement [`HostValue`] with this as `TYPE` to pass a plain `#[repr(C)]`
/// struct through a frame as raw bytes.
pub const fn opaque<T>(name: &'static str) -> HostType {
    HostType::Opaque {
        name,
        size: std::mem::size_of::<T>(),
    }
}

// ============================================================================
// HostStr
// ============================================================================

/// Text value: a data pointer and a byte length.
///
/// The data is not owned. Whoever built the value guarantees that `len`
/// bytes at `data` stay readable for as long as the value is in use.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HostStr {
    data: *const u8,
    len: usize,
}

impl HostStr {
    /// Borrow a static string
    pub const fn from_static(s: &'static str) -> Self {
        HostStr {
            data: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Build a value from raw parts.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `len` bytes for as long as the value
    /// (or any copy of it) is used.
    pub const unsafe fn from_raw_parts(data: *const u8, len: usize) -> Self {
        HostStr { data, len }
    }

    /// Length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the text is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Data pointer
    pub const fn as_ptr(&self) -> *const u8 {
        self.data
    }

    /// Raw bytes of the text
    pub fn as_bytes(&self) -> HostResult<&[u8]> {
        if self.len == 0 {
            return Ok(&[]);
        }
        if self.data.is_null() {
            return Err(HostError::NullPointer("string data"));
        }
        // SAFETY: guaranteed by the constructors
        Ok(unsafe { std::slice::from_raw_parts(self.data, self.len) })
    }

    /// The text as a `str`, checking that it is UTF-8
    pub fn to_str(&self) -> HostResult<&str> {
        Ok(std::str::from_utf8(self.as_bytes()?)?)
    }

    /// The text as a `str` without a UTF-8 check.
    ///
    /// # Safety
    ///
    /// The bytes must be valid UTF-8 and `data` must be non-null.
    pub unsafe fn as_str(&self) -> &str {
        std::str::from_utf8_unchecked(std::slice::from_raw_parts(self.data, self.len))
    }
}

impl From<&'static str> for HostStr {
    fn from(s: &'static str) -> Self {
        HostStr::from_static(s)
    }
}

impl fmt::Debug for HostStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_str() {
            Ok(s) => write!(f, "HostStr({:?})", s),
            Err(_) => write!(f, "HostStr({:p}, {})", self.data, self.len),
        }
    }
}

// ============================================================================
// HostDyn
// ============================================================================

/// Interned descriptor of a concrete type carried by a [`HostDyn`]
#[derive(Debug)]
pub struct TypeDesc {
    id: TypeId,
    name: &'static str,
}

static TYPE_DESCS: Lazy<DashMap<TypeId, &'static TypeDesc>> = Lazy::new(DashMap::new);

impl TypeDesc {
    /// The descriptor for `T`. Always the same address for the same type.
    pub fn of<T: Any>() -> &'static TypeDesc {
        let id = TypeId::of::<T>();
        if let Some(desc) = TYPE_DESCS.get(&id) {
            return *desc;
        }
        *TYPE_DESCS.entry(id).or_insert_with(|| {
            Box::leak(Box::new(TypeDesc {
                id,
                name: std::any::type_name::<T>(),
            }))
        })
    }

    /// Rust type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this describes `T`
    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

/// Dynamic value: a type descriptor pointer and a data pointer.
///
/// A nil value has both pointers null.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HostDyn {
    type_desc: *const TypeDesc,
    data: *const (),
}

impl HostDyn {
    /// Wrap a reference to a static value
    pub fn new<T: Any + Sync>(value: &'static T) -> Self {
        HostDyn {
            type_desc: TypeDesc::of::<T>(),
            data: value as *const T as *const (),
        }
    }

    /// The nil value
    pub const fn nil() -> Self {
        HostDyn {
            type_desc: std::ptr::null(),
            data: std::ptr::null(),
        }
    }

    /// Whether the value is nil
    pub fn is_nil(&self) -> bool {
        self.type_desc.is_null()
    }

    /// Type descriptor pointer, as stored in a frame
    pub fn type_desc_ptr(&self) -> *const TypeDesc {
        self.type_desc
    }

    /// Data pointer, as stored in a frame
    pub fn data_ptr(&self) -> *const () {
        self.data
    }

    fn desc(&self) -> Option<&'static TypeDesc> {
        // SAFETY: descriptors are only created by `TypeDesc::of` and leaked
        unsafe { self.type_desc.as_ref() }
    }

    /// Name of the carried type, `None` for nil
    pub fn type_name(&self) -> Option<&'static str> {
        self.desc().map(TypeDesc::name)
    }

    /// Borrow the carried value if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&'static T> {
        match self.desc() {
            Some(desc) if desc.is::<T>() && !self.data.is_null() => {
                // SAFETY: `new` pairs the descriptor of T with a &'static T
                Some(unsafe { &*(self.data as *const T) })
            }
            _ => None,
        }
    }

    /// Like [`downcast_ref`](Self::downcast_ref), but reports the mismatch
    pub fn expect_type<T: Any>(&self) -> HostResult<&'static T> {
        self.downcast_ref::<T>().ok_or_else(|| HostError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            got: self.type_name().unwrap_or("nil").to_string(),
        })
    }
}

impl fmt::Debug for HostDyn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => write!(f, "HostDyn({} @ {:p})", name, self.data),
            None => write!(f, "HostDyn(nil)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ANSWER: i64 = 42;
    static GREETING: &str = "hello";

    #[test]
    fn test_frame_read_write_unaligned() {
        let mut frame = [0u8; 32];
        let base = frame.as_mut_ptr();
        unsafe {
            7i64.write_frame(base, 1);
            2.5f64.write_frame(base, 9);
            true.write_frame(base, 17);
            assert_eq!(i64::read_frame(base, 1), 7);
            assert_eq!(f64::read_frame(base, 9), 2.5);
            assert!(bool::read_frame(base, 17));
        }
    }

    #[test]
    fn test_bool_reads_any_nonzero_as_true() {
        let frame = [0u8, 0x80];
        unsafe {
            assert!(!bool::read_frame(frame.as_ptr(), 0));
            assert!(bool::read_frame(frame.as_ptr(), 1));
        }
    }

    #[test]
    fn test_type_sizes_agree_with_layout() {
        assert_eq!(<HostStr as HostValue>::TYPE.size(), std::mem::size_of::<HostStr>());
        assert_eq!(<HostDyn as HostValue>::TYPE.size(), std::mem::size_of::<HostDyn>());
        assert_eq!(<*const u8 as HostValue>::TYPE.size(), std::mem::size_of::<*const u8>());
        assert_eq!(<u32 as HostValue>::TYPE.size(), 4);
    }

    #[test]
    fn test_host_str() {
        let s = HostStr::from_static("mul_add");
        assert_eq!(s.len(), 7);
        assert_eq!(s.to_str().unwrap(), "mul_add");

        let bytes = [0xffu8, 0xfe];
        let bad = unsafe { HostStr::from_raw_parts(bytes.as_ptr(), 2) };
        assert!(matches!(bad.to_str(), Err(HostError::InvalidUtf8(_))));

        let null = unsafe { HostStr::from_raw_parts(std::ptr::null(), 3) };
        assert!(matches!(null.to_str(), Err(HostError::NullPointer(_))));

        let empty = unsafe { HostStr::from_raw_parts(std::ptr::null(), 0) };
        assert_eq!(empty.to_str().unwrap(), "");
    }

    #[test]
    fn test_type_desc_interned() {
        let a = TypeDesc::of::<i64>() as *const TypeDesc;
        let b = TypeDesc::of::<i64>() as *const TypeDesc;
        let c = TypeDesc::of::<&str>() as *const TypeDesc;
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_host_dyn_downcast() {
        let v = HostDyn::new(&ANSWER);
        assert_eq!(v.downcast_ref::<i64>(), Some(&42));
        assert_eq!(v.downcast_ref::<u64>(), None);
        assert_eq!(v.type_name(), Some("i64"));

        let g = HostDyn::new(&GREETING);
        assert_eq!(g.downcast_ref::<&str>().copied(), Some("hello"));
        assert!(g.expect_type::<i64>().is_err());

        let nil = HostDyn::nil();
        assert!(nil.is_nil());
        assert_eq!(nil.downcast_ref::<i64>(), None);
    }
}
