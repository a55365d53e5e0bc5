//! # AppError
//!
//! Centralized error handling for the Rusty-Board ecosystem.
//! Maps store and domain failures to actionable error types.

use thiserror::Error;

/// The primary error type for all rb-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Resource not found (e.g., Thread, stored key, User)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty post, invalid file type)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Auth failure (e.g., wrong password, expired token)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Infrastructure failure (e.g., store unreachable, malformed document)
    #[error("storage error: {0}")]
    Storage(String),

    /// Resource already exists (e.g., duplicate username)
    #[error("conflict: {0}")]
    Conflict(String),
}

impl AppError {
    /// Shorthand for a missing store key.
    pub fn key_not_found(key: &str) -> Self {
        AppError::NotFound("key".to_string(), key.to_string())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        AppError::Storage(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(..))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("malformed document: {err}"))
    }
}

/// A specialized Result type for Rusty-Board logic.
pub type Result<T> = std::result::Result<T, AppError>;
