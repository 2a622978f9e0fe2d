//! Scope error type
//!
//! Raised when an expression fails to parse or to resolve within its scope.

use thiserror::Error;

/// An expression could not be parsed or resolved
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} in '{expression}'{}", .position.map(|p| format!(" at position {}", p)).unwrap_or_default())]
pub struct ScopeError {
    /// Human readable cause
    pub message: String,
    /// The offending (sub-)expression
    pub expression: String,
    /// Byte offset into the original text, when known
    pub position: Option<usize>,
}

impl ScopeError {
    pub fn new(message: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expression: expression.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Result type for semantic model operations
pub type ScopeResult<T> = Result<T, ScopeError>;
