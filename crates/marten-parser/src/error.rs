//! Frontend errors.
//!
//! Every lexer or parser failure is a `SyntaxError` carrying the exact
//! source position of first detection; no recovery is attempted.

use thiserror::Error;

/// A syntax error with its source position.
#[derive(Debug, Clone, Error)]
#[error("SyntaxError: {message} at {line}:{column}")]
pub struct ParseError {
    /// Human-readable description.
    pub message: String,
    /// 1-indexed line.
    pub line: u32,
    /// 1-indexed column.
    pub column: u32,
}

impl ParseError {
    /// Create a syntax error at a position.
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Result type for frontend operations.
pub type ParseResult<T> = Result<T, ParseError>;
