//! Running compiled functions from the host
//!
//! Every compiled function gets an application shim taking its arguments
//! as 64-bit slots; `RunValue` is the host-side view of one slot.

use crate::error::{JitError, JitResult};
use crate::jit::types::Type;

/// Native entry of an application shim
pub type ApplyShim = unsafe extern "C" fn(args: *const u64, ret: *mut u64);

/// Argument or result of `Function::run`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunValue {
    Void,
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Ptr(usize),
}

impl RunValue {
    /// Integer view; floats are rejected
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            RunValue::Int(v) => Some(v),
            RunValue::UInt(v) => Some(v as i64),
            RunValue::Ptr(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            RunValue::Int(v) => Some(v as u64),
            RunValue::UInt(v) => Some(v),
            RunValue::Ptr(v) => Some(v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            RunValue::F64(v) => Some(v),
            RunValue::F32(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            RunValue::F32(v) => Some(v),
            RunValue::F64(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<usize> {
        match *self {
            RunValue::Ptr(v) => Some(v),
            RunValue::UInt(v) => Some(v as usize),
            RunValue::Int(v) => Some(v as usize),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, RunValue::Void)
    }
}

impl From<i64> for RunValue {
    fn from(v: i64) -> Self {
        RunValue::Int(v)
    }
}

impl From<i32> for RunValue {
    fn from(v: i32) -> Self {
        RunValue::Int(v as i64)
    }
}

impl From<u64> for RunValue {
    fn from(v: u64) -> Self {
        RunValue::UInt(v)
    }
}

impl From<u32> for RunValue {
    fn from(v: u32) -> Self {
        RunValue::UInt(v as u64)
    }
}

impl From<usize> for RunValue {
    fn from(v: usize) -> Self {
        RunValue::UInt(v as u64)
    }
}

impl From<f32> for RunValue {
    fn from(v: f32) -> Self {
        RunValue::F32(v)
    }
}

impl From<f64> for RunValue {
    fn from(v: f64) -> Self {
        RunValue::F64(v)
    }
}

impl<T> From<*const T> for RunValue {
    fn from(v: *const T) -> Self {
        RunValue::Ptr(v as usize)
    }
}

/// Encode arguments into shim slots
pub(crate) fn encode_args(params: &[Type], args: &[RunValue]) -> JitResult<Vec<u64>> {
    if params.len() != args.len() {
        return Err(JitError::ArgumentMismatch(format!(
            "expected {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (ty, arg))| {
            let slot = match ty {
                Type::Float32 => arg.as_f32().map(|v| v.to_bits() as u64),
                Type::Float64 => arg.as_f64().map(f64::to_bits),
                _ => arg.as_u64(),
            };
            slot.ok_or_else(|| JitError::ArgumentMismatch(format!("argument {} is {:?}, expected {}", i, arg, ty)))
        })
        .collect()
}

/// Decode the shim result slot
pub(crate) fn decode_ret(ty: &Type, raw: u64) -> RunValue {
    match ty {
        Type::Void => RunValue::Void,
        Type::Float32 => RunValue::F32(f32::from_bits(raw as u32)),
        Type::Float64 => RunValue::F64(f64::from_bits(raw)),
        Type::Pointer(_) | Type::Signature(_) => RunValue::Ptr(raw as usize),
        t if t.is_signed() => RunValue::Int(raw as i64),
        _ => RunValue::UInt(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_args() {
        let params = [Type::Int, Type::Float64, Type::Float32, Type::void_ptr()];
        let args = [
            RunValue::from(-2i32),
            RunValue::from(1.5f64),
            RunValue::from(0.25f32),
            RunValue::Ptr(0x1000),
        ];
        let slots = encode_args(&params, &args).unwrap();
        assert_eq!(slots[0] as i64, -2);
        assert_eq!(f64::from_bits(slots[1]), 1.5);
        assert_eq!(f32::from_bits(slots[2] as u32), 0.25);
        assert_eq!(slots[3], 0x1000);
    }

    #[test]
    fn test_encode_rejects_mismatches() {
        assert!(encode_args(&[Type::Int], &[]).is_err());
        assert!(encode_args(&[Type::Float64], &[RunValue::Int(1)]).is_err());
        assert!(encode_args(&[Type::Long], &[RunValue::F64(1.0)]).is_err());
        assert!(encode_args(&[Type::Long], &[RunValue::Void]).is_err());
    }

    #[test]
    fn test_decode_ret() {
        assert_eq!(decode_ret(&Type::Void, 7), RunValue::Void);
        assert_eq!(decode_ret(&Type::Int, (-3i64) as u64), RunValue::Int(-3));
        assert_eq!(decode_ret(&Type::UByte, 1), RunValue::UInt(1));
        assert_eq!(decode_ret(&Type::Float64, 2.5f64.to_bits()), RunValue::F64(2.5));
        assert_eq!(decode_ret(&Type::void_ptr(), 0x20), RunValue::Ptr(0x20));
        assert_eq!(RunValue::Int(4).as_f64(), None);
    }
}
