//! Analysis error types
//!
//! Defines every failure the pipeline can surface, from expression scope
//! errors during compilation to cache misses and timeouts during execution.

use serde::Serialize;
use thiserror::Error;

use crate::model::ScopeError;

/// Errors that can occur while compiling or running an analysis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// An expression failed to parse or resolve
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Malformed order-by, roll-up or beyond-limit specification
    #[error("Configuration error: {0}")]
    Config(String),

    /// Downstream execution failed
    #[error("Computation error: {0}")]
    Computation(String),

    /// Lazy request and the job is not in cache
    #[error("Job {job_id} is not in cache")]
    NotInCache { job_id: String },

    /// Execution exceeded its deadline; the job keeps running
    #[error("Job {job_id} is still running, retry after {retry_after_ms}ms")]
    Timeout { job_id: String, retry_after_ms: u64 },

    /// Caller may not perform this operation
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AnalysisError {
    /// Only timeouts are worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::Timeout { .. })
    }

    /// Transport-level status class
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisError::Scope(_) | AnalysisError::Config(_) => 400,
            AnalysisError::AccessDenied(_) => 403,
            AnalysisError::NotFound(_) | AnalysisError::NotInCache { .. } => 404,
            AnalysisError::Timeout { .. } => 408,
            AnalysisError::Computation(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::Scope(_) => "SCOPE_ERROR",
            AnalysisError::Config(_) => "CONFIG_ERROR",
            AnalysisError::Computation(_) => "COMPUTATION_ERROR",
            AnalysisError::NotInCache { .. } => "NOT_IN_CACHE",
            AnalysisError::Timeout { .. } => "TIMEOUT",
            AnalysisError::AccessDenied(_) => "ACCESS_DENIED",
            AnalysisError::NotFound(_) => "NOT_FOUND",
        }
    }

    /// The innermost cause of a wrapped computation failure
    ///
    /// Computation messages are chained as `outer: inner: cause`; the last
    /// non-empty segment is the one a user can act on.
    pub fn innermost_message(&self) -> String {
        match self {
            AnalysisError::Computation(message) => message
                .rsplit(": ")
                .map(str::trim)
                .find(|s| !s.is_empty())
                .unwrap_or(message)
                .to_string(),
            AnalysisError::Scope(e) => e.message.clone(),
            other => other.to_string(),
        }
    }

    /// Prefix a computation failure with the context it occurred in
    pub fn context(self, context: &str) -> Self {
        match self {
            AnalysisError::Computation(message) => {
                AnalysisError::Computation(format!("{}: {}", context, message))
            }
            other => other,
        }
    }

    /// Serializable body for transports
    pub fn to_body(&self) -> ErrorBody {
        let (job_id, retry_after_ms) = match self {
            AnalysisError::Timeout {
                job_id,
                retry_after_ms,
            } => (Some(job_id.clone()), Some(*retry_after_ms)),
            AnalysisError::NotInCache { job_id } => (Some(job_id.clone()), None),
            _ => (None, None),
        };
        let position = match self {
            AnalysisError::Scope(e) => e.position,
            _ => None,
        };

        ErrorBody {
            code: self.code().to_string(),
            message: self.innermost_message(),
            job_id,
            retry_after_ms,
            position,
        }
    }
}

/// Error details
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;
