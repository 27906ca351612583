//! Bridge call errors

/// Errors raised while emitting a host call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The call target is not a host function
    #[error("Bridge target of type '{type_name}' is not a host function")]
    InvalidTarget {
        /// Rust type of the rejected target
        type_name: &'static str,
    },

    /// A parameter or return type has no native mapping
    #[error("Host type '{name}' at {position} has no native mapping")]
    UnclassifiedType {
        /// Display name of the host type
        name: String,
        /// Where in the signature the type appears
        position: String,
    },

    /// Wrong number of arguments for the host function
    #[error("Host function takes {expected} arguments, got {got}")]
    ArgumentCount {
        /// Parameters of the host function
        expected: usize,
        /// Arguments supplied
        got: usize,
    },

    /// An argument cannot be stored into its parameter slot
    #[error("Argument {index} is {got}, parameter expects {expected}")]
    ArgumentType {
        /// Argument position
        index: usize,
        /// Native type of the parameter
        expected: String,
        /// Native type of the argument
        got: String,
    },

    /// The resolved code address is already registered for a host function
    /// with a different invoker or frame layout
    #[error("Host function '{function}' resolves to {address:#x}, already bound to '{existing}'")]
    EntryConflict {
        /// Host function of the rejected call
        function: &'static str,
        /// Host function already registered at the address
        existing: &'static str,
        /// Resolved code address
        address: usize,
    },

    /// The emitting function is no longer under construction
    #[error("Function '{0}' is compiled; bridge calls can no longer be emitted")]
    NotBuilding(String),
}
