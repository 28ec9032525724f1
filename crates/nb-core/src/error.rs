//! # AppError
//!
//! Centralized error handling for the Nodeboard content layer.
//! Record absence on read paths is `Ok(None)`, not an error; the variants here
//! are reserved for failures a caller has to act on.

use thiserror::Error;

/// The primary error type for all nb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Target of a mutation does not exist (e.g., Topic for a new Reply)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty username, self-follow)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Bad credentials or a stale one-shot code
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Uniqueness or write-batch precondition failed
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store unreachable, pool exhausted, connection dropped
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The request deadline elapsed before the store answered
    #[error("store query timed out")]
    Timeout,

    /// A stored document no longer matches its entity shape
    #[error("corrupt document: {0}")]
    Corrupt(String),

    /// Anything else (e.g., hashing backend failure)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Unavailable(_) | AppError::Timeout | AppError::Conflict(_)
        )
    }

    pub(crate) fn not_found(kind: &str, id: impl ToString) -> Self {
        AppError::NotFound(kind.to_string(), id.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Corrupt(err.to_string())
    }
}

/// A specialized Result type for Nodeboard logic.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(AppError::Timeout.is_transient());
        assert!(AppError::Unavailable("pool closed".into()).is_transient());
        assert!(AppError::Conflict("expect failed".into()).is_transient());
        assert!(!AppError::not_found("Topic", "x").is_transient());
        assert!(!AppError::Corrupt("bad".into()).is_transient());
    }

    #[test]
    fn test_not_found_message() {
        let err = AppError::not_found("Node", "go");
        assert_eq!(err.to_string(), "Node not found with ID go");
    }
}
