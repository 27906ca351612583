//! Host ISA construction

use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use target_lexicon::Architecture;

use crate::config::ContextConfig;
use crate::error::JitError;

/// Target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    AArch64,
    Riscv64,
    S390x,
    Other,
}

/// What the engine knows about its target
#[derive(Debug, Clone, Copy)]
pub struct TargetInfo {
    pub arch: TargetArch,
    pub pointer_size: usize,
}

/// Build an ISA for the machine we are running on
pub fn host_isa(config: &ContextConfig) -> Result<OwnedTargetIsa, JitError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", config.opt_level.as_str())
        .map_err(|e| JitError::Backend(format!("Failed to set opt_level: {}", e)))?;
    // Code is placed at fixed addresses by the JIT module
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::Backend(format!("Failed to set is_pic: {}", e)))?;
    flag_builder
        .set("enable_verifier", if config.verify { "true" } else { "false" })
        .map_err(|e| JitError::Backend(format!("Failed to set enable_verifier: {}", e)))?;

    let flags = settings::Flags::new(flag_builder);

    cranelift_native::builder()
        .map_err(|e| JitError::Backend(format!("Failed to create native ISA builder: {}", e)))?
        .finish(flags)
        .map_err(|e| JitError::Backend(format!("Failed to finish ISA: {}", e)))
}

/// Describe an ISA
pub fn target_info(isa: &dyn cranelift_codegen::isa::TargetIsa) -> TargetInfo {
    let arch = match isa.triple().architecture {
        Architecture::X86_64 => TargetArch::X86_64,
        Architecture::Aarch64(_) => TargetArch::AArch64,
        Architecture::Riscv64(_) => TargetArch::Riscv64,
        Architecture::S390x => TargetArch::S390x,
        _ => TargetArch::Other,
    };
    TargetInfo {
        arch,
        pointer_size: isa.pointer_bytes() as usize,
    }
}
