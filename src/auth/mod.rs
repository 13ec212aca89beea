//! Authentication and authorization.
//!
//! The gate in front of every route yields an authenticated [`Principal`]
//! (an account name plus its admin flag) from HTTP Basic or HTTP Signature
//! credentials. The engine then enforces per-account authority: a source
//! fund's authorization is accepted only from that account's owner or an
//! admin.

pub mod error;
pub mod middleware;
pub mod signature;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

pub use error::AuthError;
pub use middleware::require_principal;
pub use signature::{key_verifies, ReceiptSigner, StateReceipt};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn new(name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            name: name.into(),
            is_admin,
        }
    }

    /// Whether this principal may act for `account`.
    pub fn can_act_for(&self, account: &str) -> bool {
        self.is_admin || self.name == account
    }
}

/// Hash a password into an argon2 PHC string for storage.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::InvalidKeyMaterial(e.to_string()))
}

/// Verify a password against a stored PHC string.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn test_principal_authority() {
        let alice = Principal::new("alice", false);
        assert!(alice.can_act_for("alice"));
        assert!(!alice.can_act_for("bob"));

        let admin = Principal::new("admin", true);
        assert!(admin.can_act_for("alice"));
        assert!(admin.can_act_for("bob"));
    }
}
