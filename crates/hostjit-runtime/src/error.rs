//! Runtime error types

/// Faults raised while serving a call from compiled code, and entry
/// registration failures.
///
/// Faults cannot unwind into compiled code. They are recorded for the calling
/// thread and collected with [`take_fault`](crate::take_fault) once control is
/// back in Rust.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// A host function panicked
    #[error("host function '{function}' panicked: {message}")]
    HostPanic {
        /// Diagnostic name of the function
        function: &'static str,
        /// Panic payload, if it was a string
        message: String,
    },

    /// The code address was never registered with the runtime
    #[error("no host function registered at {0:#x}")]
    UnknownEntry(usize),

    /// The scheduling context did not come from the readiness gate
    #[error("scheduling context {0:#x} is not registered")]
    UnknownContext(usize),

    /// A code address is already bound to a different invoker or frame size
    #[error("cannot register '{name}' at {address:#x}: already bound to '{existing}'")]
    EntryConflict {
        /// Code address
        address: usize,
        /// Name of the function already registered there
        existing: &'static str,
        /// Name of the rejected registration
        name: &'static str,
    },
}
