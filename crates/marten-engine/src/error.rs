//! Host-level errors.

use marten_core::JsError;
use marten_parser::ParseError;
use thiserror::Error;

/// Errors surfaced by the host API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source failed to parse or compile.
    #[error(transparent)]
    Syntax(#[from] ParseError),

    /// An uncaught JS error propagated out of `execute`. Inspect
    /// `name`, `message`, and `stack` on the payload.
    #[error(transparent)]
    Script(#[from] JsError),

    /// An engine invariant was violated.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Result type for host-API calls.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<marten_compiler::CompileError> for EngineError {
    fn from(error: marten_compiler::CompileError) -> Self {
        match error {
            marten_compiler::CompileError::Syntax(e) => Self::Syntax(e),
            marten_compiler::CompileError::Code(e) => Self::Internal(e.to_string()),
            marten_compiler::CompileError::Internal(e) => Self::Internal(e),
        }
    }
}
