//! Transfer handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::Principal;
use crate::engine::validation;
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::model::transfer_uri;

pub(crate) fn parse_path_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("'{raw}' is not a valid uuid")))
}

/// Fetch a stored transfer.
#[utoipa::path(
    get,
    path = "/transfers/{id}",
    params(("id" = String, Path, description = "Transfer uuid")),
    responses(
        (status = 200, description = "Stored transfer"),
        (status = 404, description = "No such transfer")
    ),
    tag = "Transfers"
)]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let transfer = state.engine.get_transfer(id)?;
    Ok((
        StatusCode::OK,
        Json(transfer.external(&state.config.base_uri)),
    )
        .into_response())
}

/// Create or advance a transfer.
#[utoipa::path(
    put,
    path = "/transfers/{id}",
    params(("id" = String, Path, description = "Transfer uuid")),
    responses(
        (status = 201, description = "Transfer created"),
        (status = 200, description = "Transfer unchanged or advanced"),
        (status = 400, description = "Malformed payload"),
        (status = 403, description = "Asserted authority not held"),
        (status = 422, description = "Semantic rule violated")
    ),
    tag = "Transfers"
)]
pub async fn put_transfer(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let payload = validation::parse_transfer(id, body, &state.config.base_uri)?;
    let outcome = state.engine.upsert(&principal, &payload, Utc::now())?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(outcome.transfer.external(&state.config.base_uri)),
    )
        .into_response())
}

/// Supply the execution-condition fulfillment for a prepared transfer.
#[utoipa::path(
    put,
    path = "/transfers/{id}/fulfillment",
    params(("id" = String, Path, description = "Transfer uuid")),
    responses(
        (status = 200, description = "Transfer completed (or already completed with this fulfillment)"),
        (status = 404, description = "No such transfer"),
        (status = 422, description = "Transfer is not prepared or has no condition")
    ),
    tag = "Transfers"
)]
pub async fn put_fulfillment(
    State(state): State<Arc<AppState>>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let fulfillment = validation::parse_fulfillment(body)?;
    let (transfer, _changed) = state.engine.fulfill(id, &fulfillment, Utc::now())?;
    Ok((
        StatusCode::OK,
        Json(transfer.external(&state.config.base_uri)),
    )
        .into_response())
}

/// Fetch the stored fulfillment.
#[utoipa::path(
    get,
    path = "/transfers/{id}/fulfillment",
    params(("id" = String, Path, description = "Transfer uuid")),
    responses(
        (status = 200, description = "Stored fulfillment"),
        (status = 404, description = "No such transfer, or no fulfillment yet")
    ),
    tag = "Transfers"
)]
pub async fn get_fulfillment(
    State(state): State<Arc<AppState>>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let fulfillment = state.engine.get_fulfillment(id)?;
    Ok((StatusCode::OK, Json(fulfillment)).into_response())
}

/// Fetch a signed state receipt for a transfer.
#[utoipa::path(
    get,
    path = "/transfers/{id}/state",
    params(("id" = String, Path, description = "Transfer uuid")),
    responses(
        (status = 200, description = "Signed state document"),
        (status = 404, description = "No such transfer")
    ),
    tag = "Transfers"
)]
pub async fn get_transfer_state(
    State(state): State<Arc<AppState>>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_path_id(&id)?;
    let transfer = state.engine.get_transfer(id)?;
    let receipt = state
        .receipt_signer
        .sign_state(&transfer_uri(&state.config.base_uri, &id), transfer.state);
    Ok((StatusCode::OK, Json(receipt)).into_response())
}
