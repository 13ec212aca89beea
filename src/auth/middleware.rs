//! Authentication middleware.
//!
//! Runs in front of every route and inserts a [`Principal`] extension, or
//! short-circuits with 403. Two credential schemes:
//!
//! - `Basic <base64(name:password)>` against the account's argon2 hash.
//! - `Signature keyId="<name>",algorithm="ed25519",signature="<base64>"`
//!   over `<name><date><method><path>`, where `Date` is the request header
//!   and must fall within the configured window of server time.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::error::AuthError;
use super::signature::key_verifies;
use super::{verify_password, Principal};
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::model::{paths, AccountRecord};
use crate::store::StoreError;

pub async fn require_principal(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    match authenticate(&state, &method, &path, req.headers()) {
        Ok(principal) => {
            debug!(principal = %principal.name, %method, %path, "request authenticated");
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(e) => {
            debug!(error = %e, %method, %path, "authentication failed");
            ApiError::from(e).into_response()
        }
    }
}

fn authenticate(
    state: &AppState,
    method: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<Principal, AuthError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    if let Some(credentials) = header.strip_prefix("Basic ") {
        verify_basic(state, credentials)
    } else if let Some(params) = header.strip_prefix("Signature ") {
        verify_signature_scheme(state, params, method, path, headers)
    } else {
        Err(AuthError::InvalidFormat(
            "expected Basic or Signature scheme".into(),
        ))
    }
}

fn load_account(state: &AppState, name: &str) -> Result<AccountRecord, AuthError> {
    state
        .store
        .with_transaction(|tx| tx.get_json_opt::<AccountRecord>(&paths::account(name)))
        .map_err(|_: StoreError| AuthError::UnknownAccount)?
        .ok_or(AuthError::UnknownAccount)
}

fn verify_basic(state: &AppState, credentials: &str) -> Result<Principal, AuthError> {
    let decoded = BASE64
        .decode(credentials.trim())
        .map_err(|_| AuthError::InvalidFormat("credentials are not base64".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthError::InvalidFormat("credentials are not utf-8".into()))?;
    let (name, password) = decoded
        .split_once(':')
        .ok_or_else(|| AuthError::InvalidFormat("expected name:password".into()))?;

    let record = load_account(state, name)?;
    let stored_hash = record.password_hash.as_deref().ok_or(AuthError::BadCredentials)?;
    if !verify_password(password, stored_hash) {
        return Err(AuthError::BadCredentials);
    }
    Ok(Principal::new(record.name, record.is_admin))
}

fn verify_signature_scheme(
    state: &AppState,
    params: &str,
    method: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<Principal, AuthError> {
    let (key_id, algorithm, signature_b64) = parse_signature_params(params)?;
    if algorithm != "ed25519" {
        return Err(AuthError::InvalidFormat(format!(
            "unsupported algorithm '{algorithm}'"
        )));
    }

    let date_raw = headers
        .get(header::DATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::InvalidFormat("Date header is required".into()))?;
    let date = DateTime::parse_from_rfc2822(date_raw)
        .map_err(|_| AuthError::InvalidFormat("Date header is not RFC 2822".into()))?
        .with_timezone(&Utc);
    let window_ms = state.config.auth.signature_time_window_ms;
    if (Utc::now() - date).num_milliseconds().abs() > window_ms {
        return Err(AuthError::StaleDate);
    }

    let record = load_account(state, &key_id)?;
    let public_key_hex = record.public_key.as_deref().ok_or(AuthError::BadCredentials)?;
    let signature = BASE64
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidFormat("signature is not base64".into()))?;

    let payload = format!("{key_id}{date_raw}{method}{path}");
    if !key_verifies(public_key_hex, payload.as_bytes(), &signature) {
        return Err(AuthError::SignatureRejected);
    }
    Ok(Principal::new(record.name, record.is_admin))
}

/// Parse `keyId="..",algorithm="..",signature=".."` (order-insensitive).
fn parse_signature_params(params: &str) -> Result<(String, String, String), AuthError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut signature = None;

    for part in params.split(',') {
        let (name, value) = part
            .trim()
            .split_once('=')
            .ok_or_else(|| AuthError::InvalidFormat("expected key=\"value\" pairs".into()))?;
        let value = value.trim_matches('"').to_string();
        match name {
            "keyId" => key_id = Some(value),
            "algorithm" => algorithm = Some(value),
            "signature" => signature = Some(value),
            _ => {}
        }
    }

    match (key_id, algorithm, signature) {
        (Some(k), Some(a), Some(s)) => Ok((k, a, s)),
        _ => Err(AuthError::InvalidFormat(
            "keyId, algorithm and signature are required".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signature_params() {
        let (key_id, algorithm, signature) = parse_signature_params(
            "keyId=\"alice\", algorithm=\"ed25519\", signature=\"c2ln\"",
        )
        .unwrap();
        assert_eq!(key_id, "alice");
        assert_eq!(algorithm, "ed25519");
        assert_eq!(signature, "c2ln");
    }

    #[test]
    fn test_parse_signature_params_missing_field() {
        let err = parse_signature_params("keyId=\"alice\"").unwrap_err();
        assert!(matches!(err, AuthError::InvalidFormat(_)));

        let err = parse_signature_params("garbage").unwrap_err();
        assert!(matches!(err, AuthError::InvalidFormat(_)));
    }
}
