//! Engine error types.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the transfer engine and its collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed payload: missing fields, unparseable amounts, id mismatch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The principal asserted authority it does not hold.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Well-formed payload violating a semantic rule.
    #[error("unprocessable: {0}")]
    UnprocessableEntity(String),

    #[error("insufficient funds on account {0}")]
    InsufficientFunds(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Store commit could not be serialized after bounded retries.
    #[error("transaction conflict")]
    Conflict,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "INVALID_REQUEST",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
            EngineError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            EngineError::InvalidTransition(_) => "INVALID_TRANSITION",
            EngineError::Conflict => "CONFLICT",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status this error surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::InvalidRequest(_) => 400,
            EngineError::Unauthorized(_) | EngineError::Forbidden(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::UnprocessableEntity(_)
            | EngineError::InsufficientFunds(_)
            | EngineError::InvalidTransition(_) => 422,
            EngineError::Conflict => 409,
            EngineError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => EngineError::NotFound(path),
            StoreError::Conflict => EngineError::Conflict,
            StoreError::AlreadyExists(path) => {
                EngineError::Internal(format!("unexpected existing value at {path}"))
            }
            StoreError::Corrupt { path, reason } => {
                EngineError::Internal(format!("corrupt record at {path}: {reason}"))
            }
        }
    }
}
