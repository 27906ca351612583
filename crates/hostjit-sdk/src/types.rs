//! Reflected host types
//!
//! `HostType` is the classification a host function's parameters and results
//! carry across the bridge. It is produced at compile time from the Rust
//! types of the function (see [`crate::HostValue`]).

use std::fmt;

/// Size of a host machine word in bytes
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Reflected type of a host function parameter or result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostType {
    /// Word-sized signed integer (`isize`)
    Int,
    /// Word-sized unsigned integer (`usize`)
    Uint,
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    Uint32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit unsigned integer
    Uint64,
    /// Boolean stored as one byte
    Bool,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Raw pointer
    Pointer,
    /// Text: `{ data pointer, length }`
    Str,
    /// Dynamic value: `{ type descriptor pointer, data pointer }`
    Dyn,
    /// A user type with a known size but no classification
    Opaque {
        /// Rust type name, for diagnostics
        name: &'static str,
        /// Size in bytes
        size: usize,
    },
}

impl HostType {
    /// Size of the value in a call frame, in bytes
    pub const fn size(&self) -> usize {
        match self {
            HostType::Int | HostType::Uint | HostType::Pointer => WORD_SIZE,
            HostType::Int32 | HostType::Uint32 | HostType::Float32 => 4,
            HostType::Int64 | HostType::Uint64 | HostType::Float64 => 8,
            HostType::Bool => 1,
            HostType::Str | HostType::Dyn => 2 * WORD_SIZE,
            HostType::Opaque { size, .. } => *size,
        }
    }

    /// Whether this is one of the integer classifications
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            HostType::Int
                | HostType::Uint
                | HostType::Int32
                | HostType::Uint32
                | HostType::Int64
                | HostType::Uint64
        )
    }

    /// Whether the classification is known to the bridge
    pub fn is_classified(&self) -> bool {
        !matches!(self, HostType::Opaque { .. })
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Int => write!(f, "int"),
            HostType::Uint => write!(f, "uint"),
            HostType::Int32 => write!(f, "int32"),
            HostType::Uint32 => write!(f, "uint32"),
            HostType::Int64 => write!(f, "int64"),
            HostType::Uint64 => write!(f, "uint64"),
            HostType::Bool => write!(f, "bool"),
            HostType::Float32 => write!(f, "float32"),
            HostType::Float64 => write!(f, "float64"),
            HostType::Pointer => write!(f, "pointer"),
            HostType::Str => write!(f, "string"),
            HostType::Dyn => write!(f, "dyn"),
            HostType::Opaque { name, .. } => write!(f, "opaque({})", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_rust_types() {
        assert_eq!(HostType::Int.size(), std::mem::size_of::<isize>());
        assert_eq!(HostType::Int64.size(), std::mem::size_of::<i64>());
        assert_eq!(HostType::Float32.size(), std::mem::size_of::<f32>());
        assert_eq!(HostType::Bool.size(), std::mem::size_of::<bool>());
        assert_eq!(HostType::Str.size(), std::mem::size_of::<&str>());
    }

    #[test]
    fn test_opaque_is_unclassified() {
        let t = HostType::Opaque { name: "Point", size: 16 };
        assert!(!t.is_classified());
        assert_eq!(t.size(), 16);
        assert_eq!(t.to_string(), "opaque(Point)");
        assert!(HostType::Str.is_classified());
    }
}
