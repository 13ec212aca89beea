//! Account handlers.
//!
//! Accounts are provisioned by admin PUT; the engine itself only ever
//! mutates balances through transfer settlement.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{hash_password, Principal};
use crate::engine::{validation, EngineError};
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::model::{paths, AccountRecord};
use crate::store::{KeyPath, Transaction};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountUpsert {
    pub name: Option<String>,
    pub balance: Option<String>,
    pub is_admin: Option<bool>,
    pub password: Option<String>,
    pub public_key: Option<String>,
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    let well_formed = !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !well_formed {
        return Err(ApiError::bad_request(format!(
            "account name '{name}' must be lowercase [a-z0-9_-], at most 32 chars"
        )));
    }
    Ok(())
}

fn decimal_at(tx: &mut Transaction<'_>, path: &KeyPath) -> String {
    match tx.get_opt(path) {
        Some(Value::String(s)) => s,
        _ => "0".to_string(),
    }
}

fn account_view(tx: &mut Transaction<'_>, record: &AccountRecord) -> Value {
    json!({
        "name": record.name,
        "balance": decimal_at(tx, &paths::balance(&record.name)),
        "held": decimal_at(tx, &paths::held(&record.name)),
        "is_admin": record.is_admin,
    })
}

/// List all accounts. Admin only.
#[utoipa::path(
    get,
    path = "/accounts",
    responses(
        (status = 200, description = "All accounts with balances"),
        (status = 403, description = "Principal is not an admin")
    ),
    tag = "Accounts"
)]
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, ApiError> {
    if !principal.is_admin {
        return Err(ApiError::forbidden("listing accounts requires admin"));
    }

    let views = state.store.with_transaction(|tx| {
        let mut views = Vec::new();
        for (path, value) in tx.scan_prefix(&paths::people()) {
            if path.len() != 2 {
                continue; // balance/held/subscription sub-paths
            }
            let record: AccountRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(%path, error = %e, "skipping undecodable account");
                    continue;
                }
            };
            views.push(account_view(tx, &record));
        }
        Ok::<_, EngineError>(views)
    })?;

    Ok((StatusCode::OK, Json(Value::Array(views))).into_response())
}

/// Account detail. Owner and admin see balances; others the public subset.
#[utoipa::path(
    get,
    path = "/accounts/{name}",
    params(("name" = String, Path, description = "Account name")),
    responses(
        (status = 200, description = "Account document"),
        (status = 404, description = "No such account")
    ),
    tag = "Accounts"
)]
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let view = state.store.with_transaction(|tx| {
        let record: Option<AccountRecord> = tx.get_json_opt(&paths::account(&name))?;
        Ok::<_, EngineError>(record.map(|record| {
            if principal.can_act_for(&record.name) {
                account_view(tx, &record)
            } else {
                json!({ "name": record.name })
            }
        }))
    })?;

    match view {
        Some(view) => Ok((StatusCode::OK, Json(view)).into_response()),
        None => Err(ApiError::not_found(format!("account {name} not found"))),
    }
}

/// Provision or update an account. Admin only.
#[utoipa::path(
    put,
    path = "/accounts/{name}",
    params(("name" = String, Path, description = "Account name")),
    responses(
        (status = 201, description = "Account created"),
        (status = 200, description = "Account updated"),
        (status = 400, description = "Malformed name or payload"),
        (status = 403, description = "Principal is not an admin")
    ),
    tag = "Accounts"
)]
pub async fn put_account(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    if !principal.is_admin {
        return Err(ApiError::forbidden("provisioning accounts requires admin"));
    }
    validate_name(&name)?;

    let body: AccountUpsert = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("malformed account: {e}")))?;
    if let Some(body_name) = &body.name {
        if body_name != &name {
            return Err(ApiError::bad_request(format!(
                "body name '{body_name}' does not match path '{name}'"
            )));
        }
    }

    let balance = body
        .balance
        .as_deref()
        .map(validation::parse_amount)
        .transpose()?;
    let password_hash = body
        .password
        .as_deref()
        .map(hash_password)
        .transpose()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let public_key = body
        .public_key
        .map(|raw| match hex::decode(&raw) {
            Ok(bytes) if bytes.len() == 32 => Ok(raw),
            _ => Err(ApiError::bad_request(
                "public_key must be 32 hex-encoded bytes",
            )),
        })
        .transpose()?;

    let now = Utc::now();
    let (created, view) = state.store.with_transaction(|tx| {
        let existing: Option<AccountRecord> = tx.get_json_opt(&paths::account(&name))?;
        let created = existing.is_none();
        let mut record = existing.unwrap_or_else(|| AccountRecord {
            name: name.clone(),
            is_admin: false,
            password_hash: None,
            public_key: None,
            created_at: now,
        });
        if let Some(is_admin) = body.is_admin {
            record.is_admin = is_admin;
        }
        if let Some(hash) = &password_hash {
            record.password_hash = Some(hash.clone());
        }
        if let Some(key) = &public_key {
            record.public_key = Some(key.clone());
        }
        tx.put_json(&paths::account(&name), &record)?;

        if let Some(balance) = balance {
            tx.put(&paths::balance(&name), Value::String(balance.to_string()));
        } else if created {
            tx.put(&paths::balance(&name), Value::String("0".into()));
        }
        if created {
            tx.put(&paths::held(&name), Value::String("0".into()));
        }
        let view = account_view(tx, &record);
        Ok::<_, EngineError>((created, view))
    })?;

    info!(account = %name, created, "account provisioned");
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(view)).into_response())
}
