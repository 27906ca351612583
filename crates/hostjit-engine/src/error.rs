//! Engine error types

use hostjit_runtime::RuntimeError;

use crate::bridge::BridgeError;
use crate::jit::lower::LowerError;

/// Result type for engine operations
pub type JitResult<T> = Result<T, JitError>;

/// Errors from building, compiling or running functions
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// ISA or settings could not be created
    #[error("Backend error: {0}")]
    Backend(String),

    /// The recorded IR could not be lowered
    #[error("Lowering failed: {0}")]
    Lowering(#[from] LowerError),

    /// Cranelift module failure while declaring, defining or finalizing
    #[error("Module error: {0}")]
    Module(String),

    /// The function has already been compiled
    #[error("Function '{0}' is already compiled")]
    AlreadyCompiled(String),

    /// The function has not been compiled yet
    #[error("Function '{0}' is not compiled")]
    NotCompiled(String),

    /// A called function of the same context has not been compiled
    #[error("Callee '{0}' must be compiled before its caller")]
    UncompiledCallee(String),

    /// Arguments do not match a signature
    #[error("Argument mismatch: {0}")]
    ArgumentMismatch(String),

    /// An operation is not defined for a type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A value or label from another function was used
    #[error("{0} does not belong to this function")]
    ForeignHandle(String),

    /// A label was placed twice
    #[error("Label {0} is already placed")]
    LabelPlaced(String),

    /// A host function panicked while serving a call
    #[error("Host function '{function}' panicked: {message}")]
    HostPanic {
        /// Diagnostic name of the host function
        function: &'static str,
        /// Panic message
        message: String,
    },

    /// The runtime refused a call
    #[error("Runtime fault: {0}")]
    Runtime(RuntimeError),

    /// Bridge call failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<RuntimeError> for JitError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::HostPanic { function, message } => JitError::HostPanic { function, message },
            other => JitError::Runtime(other),
        }
    }
}

impl From<cranelift_module::ModuleError> for JitError {
    fn from(err: cranelift_module::ModuleError) -> Self {
        JitError::Module(err.to_string())
    }
}
