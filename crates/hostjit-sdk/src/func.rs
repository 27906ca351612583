//! Host function values
//!
//! A [`HostFunc`] pairs the code address of a Rust function with its reflected
//! signature and a monomorphized invoker that knows how to unpack a call frame
//! into arguments and pack the results back.

use std::fmt;

use crate::frame::FrameLayout;
use crate::types::HostType;
use crate::value::{HostDyn, HostStr, HostValue};

/// Unpacks a frame, calls the function at `code`, writes the results back.
///
/// The frame layout is the one [`FrameLayout::new`] computes for the
/// signature the invoker was built for.
pub type FrameInvoker = unsafe fn(code: *const u8, frame: *mut u8);

// ============================================================================
// Signature
// ============================================================================

/// Reflected parameter and return types of a host function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSignature {
    params: Vec<HostType>,
    returns: Vec<HostType>,
}

impl HostSignature {
    /// Create a signature
    pub fn new(params: Vec<HostType>, returns: Vec<HostType>) -> Self {
        HostSignature { params, returns }
    }

    /// Parameter types
    pub fn params(&self) -> &[HostType] {
        &self.params
    }

    /// Return types, in declaration order
    pub fn returns(&self) -> &[HostType] {
        &self.returns
    }

    /// Frame layout for this signature
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(&self.params, &self.returns)
    }
}

impl fmt::Display for HostSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")?;
        match self.returns.len() {
            0 => Ok(()),
            1 => write!(f, " {}", self.returns[0]),
            _ => {
                write!(f, " (")?;
                for (i, r) in self.returns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", r)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ============================================================================
// Return values
// ============================================================================

/// Result type of a host function: `()`, one [`HostValue`], or a tuple of them.
///
/// # Safety
///
/// `write_returns` must write exactly the values listed by `host_types`, at
/// cumulative offsets starting from `offset`.
pub unsafe trait HostReturn: 'static {
    /// Reflected return types, in declaration order
    fn host_types() -> Vec<HostType>;

    /// Write the results into a frame.
    ///
    /// # Safety
    ///
    /// The frame must have room for every return value at `offset`.
    unsafe fn write_returns(self, frame: *mut u8, offset: usize);
}

unsafe impl HostReturn for () {
    fn host_types() -> Vec<HostType> {
        Vec::new()
    }

    unsafe fn write_returns(self, _frame: *mut u8, _offset: usize) {}
}

/// Implement [`HostReturn`] for single [`HostValue`] types.
///
/// Needed for user types that implement `HostValue` and are returned alone.
#[macro_export]
macro_rules! impl_host_return {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl $crate::HostReturn for $t {
                fn host_types() -> Vec<$crate::HostType> {
                    vec![<$t as $crate::HostValue>::TYPE]
                }

                unsafe fn write_returns(self, frame: *mut u8, offset: usize) {
                    <$t as $crate::HostValue>::write_frame(self, frame, offset)
                }
            }
        )*
    };
}

impl_host_return!(i64, u64, isize, usize, i32, u32, bool, f32, f64, HostStr, HostDyn);

unsafe impl<T: 'static> HostReturn for *const T {
    fn host_types() -> Vec<HostType> {
        vec![HostType::Pointer]
    }

    unsafe fn write_returns(self, frame: *mut u8, offset: usize) {
        HostValue::write_frame(self, frame, offset)
    }
}

unsafe impl<T: 'static> HostReturn for *mut T {
    fn host_types() -> Vec<HostType> {
        vec![HostType::Pointer]
    }

    unsafe fn write_returns(self, frame: *mut u8, offset: usize) {
        HostValue::write_frame(self, frame, offset)
    }
}

macro_rules! impl_tuple_return {
    ($($t:ident $v:ident),+) => {
        unsafe impl<$($t: HostValue),+> HostReturn for ($($t,)+) {
            fn host_types() -> Vec<HostType> {
                vec![$(<$t as HostValue>::TYPE),+]
            }

            #[allow(unused_assignments)]
            unsafe fn write_returns(self, frame: *mut u8, mut offset: usize) {
                let ($($v,)+) = self;
                $(
                    <$t as HostValue>::write_frame($v, frame, offset);
                    offset += <$t as HostValue>::TYPE.size();
                )+
            }
        }
    };
}

impl_tuple_return!(A a, B b);
impl_tuple_return!(A a, B b, C c);
impl_tuple_return!(A a, B b, C c, D d);

// ============================================================================
// Reflection of function pointers
// ============================================================================

/// Function pointer types that can become a [`HostFunc`].
///
/// Implemented for `fn(A0, .., An) -> R` with up to eight parameters, where
/// every parameter is a [`HostValue`] and `R` is a [`HostReturn`]. Coerce a
/// named function first: `HostFunc::new(mul as fn(_, _) -> _)`.
pub trait IntoHostFunc: Copy + 'static {
    /// Code address of the function
    fn code(&self) -> *const u8;

    /// Reflected signature
    fn signature() -> HostSignature;

    /// Frame invoker for this signature
    fn invoker() -> FrameInvoker;
}

macro_rules! impl_into_host_func {
    ($($p:ident $a:ident),*) => {
        impl<R: HostReturn, $($p: HostValue),*> IntoHostFunc for fn($($p),*) -> R {
            fn code(&self) -> *const u8 {
                *self as *const u8
            }

            fn signature() -> HostSignature {
                HostSignature::new(vec![$(<$p as HostValue>::TYPE),*], R::host_types())
            }

            fn invoker() -> FrameInvoker {
                #[allow(unused_mut, unused_variables)]
                unsafe fn invoke<R: HostReturn, $($p: HostValue),*>(code: *const u8, frame: *mut u8) {
                    let f: fn($($p),*) -> R = std::mem::transmute_copy(&code);
                    let mut offset = 0usize;
                    $(
                        let $a = <$p as HostValue>::read_frame(frame, offset);
                        offset += <$p as HostValue>::TYPE.size();
                    )*
                    let result = f($($a),*);
                    result.write_returns(frame, offset);
                }
                invoke::<R, $($p),*>
            }
        }
    };
}

impl_into_host_func!();
impl_into_host_func!(A0 a0);
impl_into_host_func!(A0 a0, A1 a1);
impl_into_host_func!(A0 a0, A1 a1, A2 a2);
impl_into_host_func!(A0 a0, A1 a1, A2 a2, A3 a3);
impl_into_host_func!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4);
impl_into_host_func!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_into_host_func!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_into_host_func!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);

// ============================================================================
// HostFunc
// ============================================================================

/// A host function value.
///
/// The first machine word of a `HostFunc` is the code address of the
/// function, so a pointer to a `HostFunc` is a pointer to a pointer to code.
#[repr(C)]
pub struct HostFunc {
    code: *const u8,
    invoker: FrameInvoker,
    signature: HostSignature,
    name: &'static str,
}

// The code address is immutable and points at a plain Rust function
unsafe impl Send for HostFunc {}
unsafe impl Sync for HostFunc {}

impl HostFunc {
    /// Reflect a Rust function pointer
    pub fn new<F: IntoHostFunc>(f: F) -> Self {
        HostFunc {
            code: f.code(),
            invoker: F::invoker(),
            signature: F::signature(),
            name: std::any::type_name::<F>(),
        }
    }

    /// Build a host function from parts described at run time.
    ///
    /// # Safety
    ///
    /// `invoker` must accept frames laid out by `signature.layout()` and must
    /// be safe to call with `code`.
    pub unsafe fn from_raw(code: *const u8, signature: HostSignature, invoker: FrameInvoker) -> Self {
        HostFunc {
            code,
            invoker,
            signature,
            name: "<raw host function>",
        }
    }

    /// Attach a name used in diagnostics
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Code address
    pub fn code(&self) -> *const u8 {
        self.code
    }

    /// Frame invoker
    pub fn invoker(&self) -> FrameInvoker {
        self.invoker
    }

    /// Reflected signature
    pub fn signature(&self) -> &HostSignature {
        &self.signature
    }

    /// Diagnostic name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Call the function with arguments taken from `frame`.
    ///
    /// # Safety
    ///
    /// `frame` must be valid for `self.signature().layout().size()` bytes.
    pub unsafe fn invoke_frame(&self, frame: *mut u8) {
        (self.invoker)(self.code, frame)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc")
            .field("name", &self.name)
            .field("code", &self.code)
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mul(a: i64, b: i64) -> i64 {
        a * b
    }

    fn divmod(a: i64, b: i64) -> (i64, i64) {
        (a / b, a % b)
    }

    fn answer() -> i32 {
        42
    }

    fn mixed(flag: bool, scale: f64, n: i32) -> f64 {
        if flag {
            scale * n as f64
        } else {
            0.0
        }
    }

    #[test]
    fn test_first_word_is_code_address() {
        let f = HostFunc::new(mul as fn(_, _) -> _);
        let first_word = unsafe { *(&f as *const HostFunc as *const *const u8) };
        assert_eq!(first_word, (mul as fn(i64, i64) -> i64) as *const u8);
        assert_eq!(first_word, f.code());
    }

    #[test]
    fn test_reflected_signature() {
        let f = HostFunc::new(divmod as fn(_, _) -> _);
        assert_eq!(f.signature().params(), &[HostType::Int64, HostType::Int64]);
        assert_eq!(f.signature().returns(), &[HostType::Int64, HostType::Int64]);
        assert_eq!(f.signature().to_string(), "func(int64, int64) (int64, int64)");

        let g = HostFunc::new(answer as fn() -> _);
        assert!(g.signature().params().is_empty());
        assert_eq!(g.signature().returns(), &[HostType::Int32]);
    }

    #[test]
    fn test_invoke_frame_multiplies() {
        let f = HostFunc::new(mul as fn(_, _) -> _);
        let layout = f.signature().layout();
        let mut frame = vec![0u8; layout.size()];
        unsafe {
            7i64.write_frame(frame.as_mut_ptr(), layout.param_offsets()[0]);
            8i64.write_frame(frame.as_mut_ptr(), layout.param_offsets()[1]);
            f.invoke_frame(frame.as_mut_ptr());
            assert_eq!(i64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 56);
        }
    }

    #[test]
    fn test_invoke_frame_multiple_returns_in_order() {
        let f = HostFunc::new(divmod as fn(_, _) -> _);
        let layout = f.signature().layout();
        let mut frame = vec![0u8; layout.size()];
        unsafe {
            17i64.write_frame(frame.as_mut_ptr(), layout.param_offsets()[0]);
            5i64.write_frame(frame.as_mut_ptr(), layout.param_offsets()[1]);
            f.invoke_frame(frame.as_mut_ptr());
            assert_eq!(i64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 3);
            assert_eq!(i64::read_frame(frame.as_ptr(), layout.return_offsets()[1]), 2);
        }
    }

    #[test]
    fn test_invoke_frame_packed_mixed_types() {
        let f = HostFunc::new(mixed as fn(_, _, _) -> _);
        let layout = f.signature().layout();
        assert_eq!(layout.param_offsets(), &[0, 1, 9]);
        let mut frame = vec![0u8; layout.size()];
        unsafe {
            true.write_frame(frame.as_mut_ptr(), 0);
            1.5f64.write_frame(frame.as_mut_ptr(), 1);
            4i32.write_frame(frame.as_mut_ptr(), 9);
            f.invoke_frame(frame.as_mut_ptr());
            assert_eq!(f64::read_frame(frame.as_ptr(), layout.return_offsets()[0]), 6.0);
        }
    }

    #[test]
    fn test_with_name() {
        let f = HostFunc::new(answer as fn() -> _).with_name("answer");
        assert_eq!(f.name(), "answer");
    }
}
