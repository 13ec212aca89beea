//! Subscription CRUD and notification detail.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::transfers::parse_path_id;
use crate::auth::Principal;
use crate::engine::EngineError;
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::model::{paths, Notification, Subscription, EVENT_ANY, EVENT_TRANSFER_UPDATE};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionUpsert {
    pub id: Option<String>,
    pub owner: String,
    pub event: String,
    pub target_uri: String,
}

/// Locate a subscription by id. Non-admins only ever see their own, so the
/// lookup is a direct path for them and a sweep for admins.
fn find_subscription(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
) -> Result<Option<Subscription>, EngineError> {
    state.store.with_transaction(|tx| {
        if !principal.is_admin {
            return tx
                .get_json_opt(&paths::subscription(&principal.name, &id))
                .map_err(Into::into);
        }
        let leaf = id.to_string();
        for (path, value) in tx.scan_prefix(&paths::people()) {
            let segments = path.segments();
            if segments.len() == 4 && segments[2] == "subscriptions" && segments[3] == leaf {
                return serde_json::from_value(value)
                    .map(Some)
                    .map_err(|e| EngineError::Internal(format!("corrupt subscription: {e}")));
            }
        }
        Ok(None)
    })
}

/// Create or replace a subscription.
#[utoipa::path(
    put,
    path = "/subscriptions/{id}",
    params(("id" = String, Path, description = "Subscription uuid")),
    responses(
        (status = 201, description = "Subscription created"),
        (status = 200, description = "Subscription updated"),
        (status = 400, description = "Malformed payload"),
        (status = 403, description = "Principal cannot act for the owner"),
        (status = 422, description = "Unknown owner, event or target scheme")
    ),
    tag = "Subscriptions"
)]
pub async fn put_subscription(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let body: SubscriptionUpsert = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("malformed subscription: {e}")))?;

    if let Some(body_id) = &body.id {
        let body_id = parse_path_id(body_id)?;
        if body_id != id {
            return Err(ApiError::bad_request(format!(
                "body id {body_id} does not match path id {id}"
            )));
        }
    }
    if !principal.can_act_for(&body.owner) {
        return Err(ApiError::forbidden(
            "cannot manage subscriptions for another account",
        ));
    }
    if body.event != EVENT_TRANSFER_UPDATE && body.event != EVENT_ANY {
        return Err(ApiError::unprocessable(format!(
            "unknown event '{}'",
            body.event
        )));
    }
    let target = reqwest::Url::parse(&body.target_uri)
        .map_err(|_| ApiError::unprocessable(format!("'{}' is not a URI", body.target_uri)))?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ApiError::unprocessable(
            "target_uri must be http or https",
        ));
    }

    let now = Utc::now();
    let (created, subscription) = state.store.with_transaction(|tx| {
        if tx.get_opt(&paths::account(&body.owner)).is_none() {
            return Err(EngineError::UnprocessableEntity(format!(
                "account {} does not exist",
                body.owner
            )));
        }
        let path = paths::subscription(&body.owner, &id);
        let existing: Option<Subscription> = tx.get_json_opt(&path)?;
        let subscription = Subscription {
            id,
            owner: body.owner.clone(),
            event: body.event.clone(),
            target_uri: body.target_uri.clone(),
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
        };
        tx.put_json(&path, &subscription)?;
        Ok((existing.is_none(), subscription))
    })?;

    info!(subscription = %id, owner = %subscription.owner, created, "subscription stored");
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(subscription)).into_response())
}

/// Fetch a subscription.
#[utoipa::path(
    get,
    path = "/subscriptions/{id}",
    params(("id" = String, Path, description = "Subscription uuid")),
    responses(
        (status = 200, description = "Stored subscription"),
        (status = 404, description = "No such subscription")
    ),
    tag = "Subscriptions"
)]
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    match find_subscription(&state, &principal, id)? {
        Some(subscription) => Ok((StatusCode::OK, Json(subscription)).into_response()),
        None => Err(ApiError::not_found(format!("subscription {id} not found"))),
    }
}

/// Delete a subscription.
#[utoipa::path(
    delete,
    path = "/subscriptions/{id}",
    params(("id" = String, Path, description = "Subscription uuid")),
    responses(
        (status = 200, description = "Subscription deleted"),
        (status = 404, description = "No such subscription")
    ),
    tag = "Subscriptions"
)]
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let deleted = state.store.with_transaction(|tx| {
        let direct_owner = if principal.is_admin {
            None
        } else {
            Some(principal.name.clone())
        };
        let subscription: Option<Subscription> = match &direct_owner {
            Some(owner) => tx.get_json_opt(&paths::subscription(owner, &id))?,
            None => {
                let leaf = id.to_string();
                let mut found = None;
                for (path, value) in tx.scan_prefix(&paths::people()) {
                    let segments = path.segments();
                    if segments.len() == 4 && segments[2] == "subscriptions" && segments[3] == leaf
                    {
                        found = serde_json::from_value(value).ok();
                        break;
                    }
                }
                found
            }
        };
        if let Some(subscription) = &subscription {
            tx.delete(&paths::subscription(&subscription.owner, &id));
        }
        Ok::<_, EngineError>(subscription)
    })?;

    match deleted {
        Some(subscription) => {
            info!(subscription = %id, owner = %subscription.owner, "subscription deleted");
            Ok((StatusCode::OK, Json(subscription)).into_response())
        }
        None => Err(ApiError::not_found(format!("subscription {id} not found"))),
    }
}

/// Fetch one notification of a subscription.
#[utoipa::path(
    get,
    path = "/subscriptions/{id}/notifications/{nid}",
    params(
        ("id" = String, Path, description = "Subscription uuid"),
        ("nid" = String, Path, description = "Notification uuid")
    ),
    responses(
        (status = 200, description = "Notification detail"),
        (status = 404, description = "No such notification under this subscription")
    ),
    tag = "Subscriptions"
)]
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((sid, nid)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let sid = parse_path_id(&sid)?;
    let nid = parse_path_id(&nid)?;

    // Visibility follows the subscription: unknown or foreign ids read as
    // absent rather than leaking existence.
    if find_subscription(&state, &principal, sid)?.is_none() {
        return Err(ApiError::not_found(format!("subscription {sid} not found")));
    }

    let notification = state
        .store
        .with_transaction(|tx| {
            tx.get_json_opt::<Notification>(&paths::notification(&nid))
        })
        .map_err(EngineError::from)?
        .filter(|n| n.subscription_id == sid)
        .ok_or_else(|| ApiError::not_found(format!("notification {nid} not found")))?;

    let view = json!({
        "id": notification.id,
        "subscription": notification.subscription_id,
        "event": notification.event,
        "resource": notification.transfer.external(&state.config.base_uri),
        "attempts": notification.attempts,
        "state": notification.state,
        "next_attempt_at": notification.next_attempt_at,
        "created_at": notification.created_at,
    });
    Ok((StatusCode::OK, Json(view)).into_response())
}
