//! HTTP gateway.
//!
//! Router assembly and server bootstrap. Every route except the OpenAPI
//! document sits behind the authentication middleware; per-account authority
//! is enforced in the handlers and the engine.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::require_principal;
use crate::websocket::transfers_stream;
use state::AppState;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route(
            "/transfers/{id}",
            get(handlers::get_transfer).put(handlers::put_transfer),
        )
        .route(
            "/transfers/{id}/fulfillment",
            get(handlers::get_fulfillment).put(handlers::put_fulfillment),
        )
        .route("/transfers/{id}/state", get(handlers::get_transfer_state))
        .route("/accounts", get(handlers::list_accounts))
        .route(
            "/accounts/{name}",
            get(handlers::get_account).put(handlers::put_account),
        )
        .route("/accounts/{name}/transfers", get(transfers_stream))
        .route(
            "/subscriptions/{id}",
            get(handlers::get_subscription)
                .put(handlers::put_subscription)
                .delete(handlers::delete_subscription),
        )
        .route(
            "/subscriptions/{id}/notifications/{nid}",
            get(handlers::get_notification),
        )
        .layer(from_fn_with_state(state.clone(), require_principal));

    Router::new()
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
