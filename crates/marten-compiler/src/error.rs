//! Compilation errors.

use marten_parser::ParseError;
use thiserror::Error;

/// Compilation errors.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A syntax error, from the parser or from code generation (unknown
    /// labels, duplicate labels, misplaced `return`).
    #[error(transparent)]
    Syntax(#[from] ParseError),

    /// A code-format limit was hit.
    #[error(transparent)]
    Code(#[from] marten_code::CodeError),

    /// Internal compiler error.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// A syntax error raised during code generation.
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Syntax(ParseError::new(message, line, column))
    }

    /// An internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;
