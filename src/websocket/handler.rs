//! Transfer-stream WebSocket handler.
//!
//! `GET /accounts/{name}/transfers` upgrades to a WebSocket that streams
//! `transfer_update` messages for every transfer touching `name`. The auth
//! gate runs before the upgrade; only the account owner or an admin may
//! stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;

use super::connection::ConnectionManager;
use super::messages::WsMessage;
use crate::auth::Principal;
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::model::paths;
use crate::store::StoreError;

/// WebSocket upgrade for an account's transfer stream.
pub async fn transfers_stream(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if !principal.can_act_for(&name) {
        return ApiError::forbidden("cannot stream transfers for another account").into_response();
    }
    let exists = state
        .store
        .with_transaction(|tx| Ok::<_, StoreError>(tx.get_opt(&paths::account(&name)).is_some()));
    match exists {
        Ok(true) => {}
        Ok(false) => return ApiError::not_found(format!("account {name} not found")).into_response(),
        Err(e) => return ApiError::from(crate::engine::EngineError::from(e)).into_response(),
    }

    let manager = state.ws_manager.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, name, manager))
}

async fn handle_socket(socket: WebSocket, account: String, manager: Arc<ConnectionManager>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let conn_id = manager.add_connection(&account, tx.clone());

    let welcome = WsMessage::Connected {
        account: account.clone(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward pushed messages to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle inbound frames (ping, close).
    let tx_for_recv = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if text.contains("\"type\"") && text.contains("\"ping\"") {
                        let _ = tx_for_recv.send(WsMessage::Pong);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    manager.remove_connection(&account, conn_id);
}
