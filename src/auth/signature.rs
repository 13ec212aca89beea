//! Ed25519 signing and verification for the ledger's two key uses:
//! checking client request signatures against an account's stored key, and
//! signing transfer state receipts with the ledger's own key. Fulfillments
//! are never verified here; conditions are opaque to the engine.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use serde_json::{json, Value};

use super::error::AuthError;
use crate::engine::TransferState;

/// Check `signature` over `message` against a hex-encoded account key, as
/// stored on the account record. Malformed key material, a bad hex string,
/// or a wrong-length signature all read as a failed verification.
pub fn key_verifies(public_key_hex: &str, message: &[u8], signature: &[u8]) -> bool {
    decode_verifying_key(public_key_hex)
        .zip(Signature::from_slice(signature).ok())
        .map(|(key, sig)| key.verify(message, &sig).is_ok())
        .unwrap_or(false)
}

fn decode_verifying_key(public_key_hex: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(public_key_hex.trim()).ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// A signed transfer state document.
#[derive(Debug, Clone, Serialize)]
pub struct StateReceipt {
    pub message: Value,
    #[serde(rename = "type")]
    pub algorithm: String,
    pub signer: String,
    pub public_key: String,
    pub signature: String,
}

/// Signs state receipts with the ledger's ed25519 key.
pub struct ReceiptSigner {
    key: SigningKey,
    signer: String,
}

impl ReceiptSigner {
    /// Build from a 32-byte hex seed (from configuration).
    pub fn from_seed_hex(seed: &str, signer: impl Into<String>) -> Result<Self, AuthError> {
        let bytes = hex::decode(seed.trim())
            .map_err(|e| AuthError::InvalidKeyMaterial(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthError::InvalidKeyMaterial("seed must be 32 bytes".into()))?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
            signer: signer.into(),
        })
    }

    /// Generate an ephemeral key. Receipts signed with it do not survive a
    /// restart; configure a seed for stable receipts.
    pub fn generate(signer: impl Into<String>) -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            key: SigningKey::generate(&mut rng),
            signer: signer.into(),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    /// Sign a state document for a transfer.
    pub fn sign_state(&self, transfer_uri: &str, state: TransferState) -> StateReceipt {
        let message = json!({
            "id": transfer_uri,
            "state": state,
        });
        let bytes = serde_json::to_vec(&message)
            .expect("state message always serializes");
        let signature = self.key.sign(&bytes);
        StateReceipt {
            message,
            algorithm: "ed25519-sha512".to_string(),
            signer: self.signer.clone(),
            public_key: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_verifies_roundtrip() {
        let signer = ReceiptSigner::generate("http://ledger.example");
        let message = b"the quick brown fox";
        let signature = signer.key.sign(message).to_bytes();

        assert!(key_verifies(&signer.public_key_hex(), message, &signature));
        assert!(!key_verifies(&signer.public_key_hex(), b"tampered", &signature));
    }

    #[test]
    fn test_key_verifies_rejects_malformed_input() {
        let signer = ReceiptSigner::generate("x");
        let message = b"m";
        let signature = signer.key.sign(message).to_bytes();

        // Bad hex, truncated key, truncated signature.
        assert!(!key_verifies("not hex", message, &signature));
        assert!(!key_verifies("abcd", message, &signature));
        assert!(!key_verifies(&signer.public_key_hex(), message, &signature[..32]));
    }

    #[test]
    fn test_seed_roundtrip() {
        let seed = "11".repeat(32);
        let a = ReceiptSigner::from_seed_hex(&seed, "x").unwrap();
        let b = ReceiptSigner::from_seed_hex(&seed, "x").unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());

        assert!(ReceiptSigner::from_seed_hex("abcd", "x").is_err());
        assert!(ReceiptSigner::from_seed_hex("zz", "x").is_err());
    }

    #[test]
    fn test_state_receipt_is_verifiable() {
        let signer = ReceiptSigner::generate("http://ledger.example");
        let receipt = signer.sign_state(
            "http://ledger.example/transfers/00000000-0000-0000-0000-000000000000",
            TransferState::Completed,
        );

        assert_eq!(receipt.algorithm, "ed25519-sha512");
        assert_eq!(receipt.message["state"], "completed");

        let bytes = serde_json::to_vec(&receipt.message).unwrap();
        let signature = hex::decode(&receipt.signature).unwrap();
        assert!(key_verifies(&receipt.public_key, &bytes, &signature));
    }
}
