//! syncr error types

use crate::dtype::DType;

/// syncr result type
pub type Result<T> = std::result::Result<T, Error>;

/// syncr errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Optimizer whose state cannot be flattened for broadcast
    #[error("unsupported optimizer: {reason}")]
    UnsupportedOptimizer {
        /// Why the optimizer's state cannot be synchronized
        reason: String,
    },

    /// Size/payload mismatch inside the exchange protocol.
    ///
    /// Sizes are produced by the collective layer itself, so this indicates
    /// a lower-layer contract breach, not bad user input.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the mismatch
        reason: String,
    },

    /// The object codec could not encode or decode a payload
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of what went wrong
        reason: String,
    },

    /// Collective communication error
    #[error("collective error: {reason}")]
    Comm {
        /// Description of what went wrong
        reason: String,
    },

    /// DType mismatch when viewing a tensor's elements
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },
}
