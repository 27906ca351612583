//! Error types for the host SDK

/// Result type for SDK conversions
pub type HostResult<T> = Result<T, HostError>;

/// Host value error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// Type mismatch during conversion
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// A text value does not hold valid UTF-8
    #[error("Invalid UTF-8 in host string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A required pointer was null
    #[error("Null {0}")]
    NullPointer(&'static str),
}
