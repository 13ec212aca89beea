//! Store error types.

use thiserror::Error;

/// Errors surfaced by the transactional key-path store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no value at {0}")]
    NotFound(String),

    #[error("value already exists at {0}")]
    AlreadyExists(String),

    /// Commit validation failed: a path read or written by this transaction
    /// was committed by another transaction in the meantime.
    #[error("transaction conflict")]
    Conflict,

    #[error("stored value at {path} does not decode: {reason}")]
    Corrupt { path: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::NotFound("people/alice".into()).to_string(),
            "no value at people/alice"
        );
        assert_eq!(StoreError::Conflict.to_string(), "transaction conflict");
    }
}
