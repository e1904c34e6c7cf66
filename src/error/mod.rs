//! Unified error handling for the access core

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cross-scope parent, self-ancestry cycle or depth overflow
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A statement failed inside a write transaction; the transaction was rolled back
    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for callers that map errors onto a transport.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidHierarchy(_) => "invalid_hierarchy",
            AppError::BadRequest(_) => "bad_request",
            AppError::Validation(_) => "validation",
            AppError::TransactionFailure(_) => "transaction_failure",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Re-tag a raw database failure raised inside a write transaction.
    ///
    /// Business-rule errors pass through untouched.
    pub fn in_transaction(self) -> Self {
        match self {
            AppError::Database(e) => AppError::TransactionFailure(e.to_string()),
            other => other,
        }
    }
}

// Conversion from validation errors
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}
