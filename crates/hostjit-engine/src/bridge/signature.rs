//! Native signature synthesis for host functions

use hostjit_sdk::HostSignature;

use super::error::BridgeError;
use super::type_map::map_host_type;
use crate::config::UnclassifiedPolicy;
use crate::jit::types::{Abi, Type};

/// Native view of a host function's signature
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSignature {
    params: Vec<Type>,
    returns: Vec<Type>,
    signature: Type,
}

impl BridgeSignature {
    /// Map every parameter and return of `host`.
    ///
    /// Zero returns give `void`, one return is used as is, several are
    /// bundled into a naturally aligned struct.
    pub fn synthesize(host: &HostSignature, policy: UnclassifiedPolicy) -> Result<Self, BridgeError> {
        let params = host
            .params()
            .iter()
            .enumerate()
            .map(|(i, t)| map_host_type(*t, policy, &format!("parameter {}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let returns = host
            .returns()
            .iter()
            .enumerate()
            .map(|(i, t)| map_host_type(*t, policy, &format!("return {}", i)))
            .collect::<Result<Vec<_>, _>>()?;

        let ret = match returns.as_slice() {
            [] => Type::Void,
            [single] => single.clone(),
            many => Type::create_struct(many.to_vec()),
        };
        let signature = Type::create_signature(params.clone(), ret);
        debug_assert_eq!(signature.signature().map(|s| s.abi()), Some(Abi::Cdecl));

        Ok(BridgeSignature {
            params,
            returns,
            signature,
        })
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn returns(&self) -> &[Type] {
        &self.returns
    }

    /// The synthesized signature type
    pub fn signature(&self) -> &Type {
        &self.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostjit_sdk::HostType;

    #[test]
    fn test_return_shapes() {
        let none = HostSignature::new(vec![HostType::Int], vec![]);
        let s = BridgeSignature::synthesize(&none, UnclassifiedPolicy::Error).unwrap();
        assert_eq!(s.signature().return_type(), Some(&Type::Void));

        let one = HostSignature::new(vec![HostType::Int64, HostType::Int64], vec![HostType::Int64]);
        let s = BridgeSignature::synthesize(&one, UnclassifiedPolicy::Error).unwrap();
        assert_eq!(s.signature().return_type(), Some(&Type::Long));
        assert_eq!(s.signature().num_params(), 2);

        let two = HostSignature::new(vec![], vec![HostType::Int32, HostType::Float64]);
        let s = BridgeSignature::synthesize(&two, UnclassifiedPolicy::Error).unwrap();
        let ret = s.signature().return_type().unwrap();
        assert!(ret.is_struct());
        assert_eq!(ret.offset(1), Some(8));
        assert_eq!(s.returns(), &[Type::Int, Type::Float64]);
    }

    #[test]
    fn test_unclassified_position() {
        let sig = HostSignature::new(
            vec![HostType::Int],
            vec![HostType::Opaque { name: "Handle", size: 8 }],
        );
        let err = BridgeSignature::synthesize(&sig, UnclassifiedPolicy::Error).unwrap_err();
        assert!(matches!(err, BridgeError::UnclassifiedType { ref position, .. } if position == "return 0"));

        let s = BridgeSignature::synthesize(&sig, UnclassifiedPolicy::DegradeToVoid).unwrap();
        assert_eq!(s.returns(), &[Type::Void]);
    }
}
