//! Host type → native type mapping

use hostjit_sdk::HostType;

use super::error::BridgeError;
use crate::config::UnclassifiedPolicy;
use crate::jit::types::Type;

/// Native layout of `HostStr`: `{ data: void*, len: nuint }`
pub fn string_type() -> Type {
    Type::create_struct_named(vec![
        ("data".to_string(), Type::void_ptr()),
        ("len".to_string(), Type::NUInt),
    ])
}

/// Native layout of `HostDyn`: `{ type: void*, data: void* }`
pub fn dyn_type() -> Type {
    Type::create_struct_named(vec![
        ("type".to_string(), Type::void_ptr()),
        ("data".to_string(), Type::void_ptr()),
    ])
}

/// Map one host type.
///
/// `position` only feeds diagnostics ("parameter 0", "return 1").
pub fn map_host_type(ty: HostType, policy: UnclassifiedPolicy, position: &str) -> Result<Type, BridgeError> {
    Ok(match ty {
        HostType::Int => Type::NInt,
        HostType::Uint => Type::NUInt,
        HostType::Int32 => Type::Int,
        HostType::Uint32 => Type::UInt,
        HostType::Int64 => Type::Long,
        HostType::Uint64 => Type::ULong,
        HostType::Bool => Type::UByte,
        HostType::Float32 => Type::Float32,
        HostType::Float64 => Type::Float64,
        HostType::Pointer => Type::void_ptr(),
        HostType::Str => string_type(),
        HostType::Dyn => dyn_type(),
        HostType::Opaque { .. } => match policy {
            UnclassifiedPolicy::Error => {
                return Err(BridgeError::UnclassifiedType {
                    name: ty.to_string(),
                    position: position.to_string(),
                })
            }
            UnclassifiedPolicy::DegradeToVoid => {
                tracing::warn!(
                    target: "hostjit::bridge",
                    host_type = %ty,
                    position,
                    "unclassified host type mapped to void"
                );
                Type::Void
            }
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostjit_sdk::WORD_SIZE;

    #[test]
    fn test_scalar_mapping() {
        let p = UnclassifiedPolicy::Error;
        assert_eq!(map_host_type(HostType::Int, p, "").unwrap(), Type::NInt);
        assert_eq!(map_host_type(HostType::Uint32, p, "").unwrap(), Type::UInt);
        assert_eq!(map_host_type(HostType::Int64, p, "").unwrap(), Type::Long);
        assert_eq!(map_host_type(HostType::Bool, p, "").unwrap(), Type::UByte);
        assert_eq!(map_host_type(HostType::Float32, p, "").unwrap(), Type::Float32);
        assert!(map_host_type(HostType::Pointer, p, "").unwrap().is_pointer());
    }

    #[test]
    fn test_sizes_agree_with_host() {
        let all = [
            HostType::Int,
            HostType::Uint,
            HostType::Int32,
            HostType::Uint32,
            HostType::Int64,
            HostType::Uint64,
            HostType::Bool,
            HostType::Float32,
            HostType::Float64,
            HostType::Pointer,
            HostType::Str,
            HostType::Dyn,
        ];
        for ty in all {
            let native = map_host_type(ty, UnclassifiedPolicy::Error, "").unwrap();
            assert_eq!(native.size(), ty.size(), "{}", ty);
        }
    }

    #[test]
    fn test_string_layout() {
        let s = string_type();
        assert_eq!(s.num_fields(), 2);
        assert_eq!(s.offset(1), Some(WORD_SIZE));
        assert_eq!(s.find_name("len"), Some(1));
        let d = dyn_type();
        assert_eq!(d.find_name("type"), Some(0));
        assert_eq!(d.size(), 2 * WORD_SIZE);
    }

    #[test]
    fn test_opaque_policy() {
        let t = HostType::Opaque { name: "Mutex", size: 40 };
        let err = map_host_type(t, UnclassifiedPolicy::Error, "parameter 2").unwrap_err();
        assert_eq!(
            err,
            BridgeError::UnclassifiedType {
                name: "opaque(Mutex)".to_string(),
                position: "parameter 2".to_string(),
            }
        );
        assert_eq!(map_host_type(t, UnclassifiedPolicy::DegradeToVoid, "parameter 2").unwrap(), Type::Void);
    }
}
