//! Per-context native stubs
//!
//! Every context imports two runtime symbols once: the readiness gate and
//! the cross-call trampoline. Bridge calls reference the imported ids.

use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::error::JitResult;
use crate::jit::ir::StubKind;
use crate::jit::lower::clif_signature;
use crate::jit::types::Type;

/// Symbol of the readiness gate
pub const GATE_SYMBOL: &str = "hostjit_wait_runtime_init_done";
/// Symbol of the cross-call trampoline
pub const CROSSCALL_SYMBOL: &str = "hostjit_crosscall";

/// Stub declarations of one context
#[derive(Debug, Clone)]
pub struct ContextStubs {
    gate: FuncId,
    crosscall: FuncId,
    gate_sig: Type,
    crosscall_sig: Type,
}

/// `() -> nuint`
pub fn gate_signature() -> Type {
    Type::create_signature(vec![], Type::NUInt)
}

/// `(wrapper: void*, record: void*, size: int, ctxt: nuint) -> void`
pub fn crosscall_signature() -> Type {
    Type::create_signature(
        vec![Type::void_ptr(), Type::void_ptr(), Type::Int, Type::NUInt],
        Type::Void,
    )
}

impl ContextStubs {
    /// Make the runtime symbols resolvable by the module
    pub fn install(builder: &mut JITBuilder) {
        builder.symbol(GATE_SYMBOL, hostjit_runtime::hostjit_wait_runtime_init_done as *const u8);
        builder.symbol(CROSSCALL_SYMBOL, hostjit_runtime::hostjit_crosscall as *const u8);
    }

    /// Declare both stubs as imports
    pub fn declare(module: &mut JITModule) -> JitResult<Self> {
        let ptr = module.target_config().pointer_type();
        let call_conv = module.isa().default_call_conv();
        let gate_sig = gate_signature();
        let crosscall_sig = crosscall_signature();

        let clif_gate = gate_sig
            .signature()
            .map(|s| clif_signature(s, call_conv, ptr))
            .transpose()?
            .unwrap_or_else(|| module.make_signature());
        let clif_crosscall = crosscall_sig
            .signature()
            .map(|s| clif_signature(s, call_conv, ptr))
            .transpose()?
            .unwrap_or_else(|| module.make_signature());

        let gate = module.declare_function(GATE_SYMBOL, Linkage::Import, &clif_gate)?;
        let crosscall = module.declare_function(CROSSCALL_SYMBOL, Linkage::Import, &clif_crosscall)?;

        tracing::debug!(target: "hostjit::bridge", "declared runtime stubs");
        Ok(ContextStubs {
            gate,
            crosscall,
            gate_sig,
            crosscall_sig,
        })
    }

    pub fn func_id(&self, kind: StubKind) -> FuncId {
        match kind {
            StubKind::Gate => self.gate,
            StubKind::Crosscall => self.crosscall,
        }
    }

    pub fn signature(&self, kind: StubKind) -> &Type {
        match kind {
            StubKind::Gate => &self.gate_sig,
            StubKind::Crosscall => &self.crosscall_sig,
        }
    }
}
