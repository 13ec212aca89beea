//! Authentication errors.
//!
//! Every authentication failure surfaces as 403: the client holds no usable
//! identity and must re-authenticate.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("malformed authorization header: {0}")]
    InvalidFormat(String),

    #[error("unknown account")]
    UnknownAccount,

    #[error("bad credentials")]
    BadCredentials,

    #[error("signature rejected")]
    SignatureRejected,

    #[error("date header outside acceptable window")]
    StaleDate,

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "MISSING_CREDENTIALS",
            AuthError::InvalidFormat(_) => "INVALID_FORMAT",
            AuthError::UnknownAccount => "UNKNOWN_ACCOUNT",
            AuthError::BadCredentials => "BAD_CREDENTIALS",
            AuthError::SignatureRejected => "SIGNATURE_REJECTED",
            AuthError::StaleDate => "STALE_DATE",
            AuthError::InvalidKeyMaterial(_) => "INVALID_KEY_MATERIAL",
        }
    }

    pub fn http_status(&self) -> u16 {
        403
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_auth_error_is_forbidden() {
        let errors = [
            AuthError::MissingCredentials,
            AuthError::InvalidFormat("x".into()),
            AuthError::UnknownAccount,
            AuthError::BadCredentials,
            AuthError::SignatureRejected,
            AuthError::StaleDate,
        ];
        for e in errors {
            assert_eq!(e.http_status(), 403, "{e}");
        }
    }
}
