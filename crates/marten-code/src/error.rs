//! Code-format errors.

use thiserror::Error;

/// Errors raised while building or validating a method body.
#[derive(Debug, Error)]
pub enum CodeError {
    /// A label was used in a branch but never placed.
    #[error("label {0} was never placed")]
    UnplacedLabel(u32),

    /// The frame needs more slots than the format allows.
    #[error("too many slots (max 65535)")]
    TooManySlots,

    /// The constant pool overflowed.
    #[error("too many constants (max 4294967295)")]
    TooManyConstants,
}

/// Result type for code-format operations.
pub type CodeResult<T> = Result<T, CodeError>;
