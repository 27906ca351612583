//! Argument/return marshaling for bridge calls
//!
//! A bridge call is emitted as:
//!
//! ```text
//! record  = local <packed struct of params, returns, code slot>
//! addr    = address_of record
//! store_relative(addr, param_offset(i), arg_i)     for every argument
//! store_relative(addr, code_offset, <code address>)
//! ctxt    = call wait_runtime_init_done()
//! call crosscall(<bridge_wrapper>, addr, <record size>, ctxt)
//! ret_j   = load_relative(addr, return_offset(j))  for every return
//! ```

use std::any::Any;

use hostjit_runtime::{CallWrapper, RuntimeError};
use hostjit_sdk::{HostDyn, HostFunc, HostStr, IntoHostFunc, WORD_SIZE};

use super::error::BridgeError;
use super::record::CallRecord;
use super::signature::BridgeSignature;
use super::type_map::{dyn_type, string_type};
use super::wrapper::bridge_wrapper;
use crate::error::{JitError, JitResult};
use crate::jit::ir::StubKind;
use crate::jit::types::Type;
use crate::jit::{Function, Value};

impl Function {
    /// Emit a call to the host function `target` and return its results,
    /// in declaration order.
    ///
    /// Fails with `InvalidTarget` if `target` is not a [`HostFunc`], and with
    /// `EntryConflict` if its code address is already bound to a host
    /// function of another shape. Every
    /// check happens before the first instruction is recorded, so a failed
    /// call leaves the function unchanged.
    pub fn bridge_call<T: Any>(&mut self, target: &T, args: &[Value]) -> JitResult<Vec<Value>> {
        if self.is_compiled() {
            return Err(BridgeError::NotBuilding(self.name().to_string()).into());
        }
        let func = (target as &dyn Any)
            .downcast_ref::<HostFunc>()
            .ok_or(BridgeError::InvalidTarget {
                type_name: std::any::type_name::<T>(),
            })?;

        let policy = self.shared().config.unclassified_policy;
        let sig = BridgeSignature::synthesize(func.signature(), policy)?;
        self.check_bridge_args(&sig, args)?;

        let code = self.shared().resolver.resolve(func);
        let registered = hostjit_runtime::runtime().entries().register(
            code,
            func.invoker(),
            func.signature().layout().size(),
            func.name(),
        );
        if let Err(err) = registered {
            return Err(match err {
                RuntimeError::EntryConflict { address, existing, name } => BridgeError::EntryConflict {
                    function: name,
                    existing,
                    address,
                }
                .into(),
                other => other.into(),
            });
        }

        let record = CallRecord::new(sig.params(), sig.returns());
        let rec = self.create_value(record.record_type().clone())?;
        let addr = self.address_of(&rec)?;

        for (i, (arg, ty)) in args.iter().zip(sig.params()).enumerate() {
            if ty.is_void() {
                continue;
            }
            let value = self.coerce(arg, ty)?;
            let offset = record.param_offset(i).unwrap_or_default();
            self.store_relative(&addr, offset as i64, &value)?;
        }

        let code_value = self.create_ptr_constant(code as usize)?;
        self.store_relative(&addr, record.code_offset() as i64, &code_value)?;

        let ctxt = self
            .call_stub(StubKind::Gate, &[])?
            .ok_or_else(|| JitError::ArgumentMismatch("readiness gate returned no context".to_string()))?;
        let wrapper = self.create_ptr_constant(bridge_wrapper as CallWrapper as usize)?;
        let size = self.create_nint_constant(Type::Int, record.size() as i64)?;
        self.call_stub(StubKind::Crosscall, &[wrapper, addr.clone(), size, ctxt])?;

        let mut results = Vec::with_capacity(sig.returns().len());
        for (j, ty) in sig.returns().iter().enumerate() {
            let value = if ty.is_void() {
                // Degraded return: nothing to load
                self.create_int_value(0)?
            } else {
                let offset = record.return_offset(j).unwrap_or_default();
                self.load_relative(&addr, offset as i64, ty)?
            };
            results.push(value);
        }

        tracing::debug!(
            target: "hostjit::bridge",
            function = func.name(),
            host_signature = %func.signature(),
            native_signature = %sig.signature(),
            record_size = record.size(),
            "emitted bridge call"
        );
        Ok(results)
    }

    /// `bridge_call` for a plain Rust function
    pub fn bridge_call_fn<F: IntoHostFunc>(&mut self, f: F, args: &[Value]) -> JitResult<Vec<Value>> {
        self.bridge_call(&HostFunc::new(f), args)
    }

    fn check_bridge_args(&self, sig: &BridgeSignature, args: &[Value]) -> JitResult<()> {
        if sig.params().len() != args.len() {
            return Err(BridgeError::ArgumentCount {
                expected: sig.params().len(),
                got: args.len(),
            }
            .into());
        }
        for (index, (arg, ty)) in args.iter().zip(sig.params()).enumerate() {
            self.check(arg)?;
            let compatible = ty.is_void() || arg.ty() == ty || (arg.ty().is_scalar() && ty.is_scalar());
            if !compatible {
                return Err(BridgeError::ArgumentType {
                    index,
                    expected: ty.to_string(),
                    got: arg.ty().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Local holding a `HostStr` constant
    pub fn create_str_constant(&mut self, s: HostStr) -> JitResult<Value> {
        let value = self.create_value(string_type())?;
        let addr = self.address_of(&value)?;
        let data = self.create_ptr_constant(s.as_ptr() as usize)?;
        let len = self.create_nint_constant(Type::NUInt, s.len() as i64)?;
        self.store_relative(&addr, 0, &data)?;
        self.store_relative(&addr, WORD_SIZE as i64, &len)?;
        Ok(value)
    }

    /// Local holding a `HostDyn` constant
    pub fn create_dyn_constant(&mut self, d: HostDyn) -> JitResult<Value> {
        let value = self.create_value(dyn_type())?;
        let addr = self.address_of(&value)?;
        let desc = self.create_ptr_constant(d.type_desc_ptr() as usize)?;
        let data = self.create_ptr_constant(d.data_ptr() as usize)?;
        self.store_relative(&addr, 0, &desc)?;
        self.store_relative(&addr, WORD_SIZE as i64, &data)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::BridgeError;
    use crate::error::JitError;
    use crate::jit::{Context, Type};
    use hostjit_sdk::HostFunc;

    fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    #[test]
    fn test_invalid_target_emits_nothing() {
        let ctx = Context::new().unwrap();
        let mut f = ctx.create_function(&[Type::Long], Type::Long).unwrap();
        let x = f.param(0).unwrap();
        let before = f.instruction_count();
        let err = f.bridge_call(&42u32, &[x]).unwrap_err();
        assert!(matches!(
            err,
            JitError::Bridge(BridgeError::InvalidTarget { type_name: "u32" })
        ));
        assert_eq!(f.instruction_count(), before);
    }

    #[test]
    fn test_argument_count_checked_first() {
        let ctx = Context::new().unwrap();
        let mut f = ctx.create_function(&[Type::Long], Type::Long).unwrap();
        let x = f.param(0).unwrap();
        let host = HostFunc::new(add as fn(i64, i64) -> i64);
        let err = f.bridge_call(&host, &[x]).unwrap_err();
        assert!(matches!(
            err,
            JitError::Bridge(BridgeError::ArgumentCount { expected: 2, got: 1 })
        ));
        assert_eq!(f.instruction_count(), 0);
    }

    #[test]
    fn test_aggregate_argument_rejected_for_scalar() {
        let ctx = Context::new().unwrap();
        let mut f = ctx.create_function(&[Type::Long], Type::Long).unwrap();
        let x = f.param(0).unwrap();
        let s = f.create_value(Type::create_struct(vec![Type::Long])).unwrap();
        let host = HostFunc::new(add as fn(i64, i64) -> i64);
        let err = f.bridge_call(&host, &[x, s]).unwrap_err();
        assert!(matches!(err, JitError::Bridge(BridgeError::ArgumentType { index: 1, .. })));
    }

    #[test]
    fn test_bridge_call_records_gate_then_crosscall() {
        let ctx = Context::new().unwrap();
        let mut f = ctx.create_function(&[Type::Long, Type::Long], Type::Long).unwrap();
        let a = f.param(0).unwrap();
        let b = f.param(1).unwrap();
        let out = f.bridge_call_fn(add as fn(i64, i64) -> i64, &[a, b]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ty(), &Type::Long);

        let text = f.dump();
        let gate = text.find("stub.wait_runtime_init_done").unwrap();
        let cross = text.find("stub.crosscall").unwrap();
        assert!(gate < cross);
    }
}
