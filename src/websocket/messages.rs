//! WebSocket message types.

use serde::Serialize;
use serde_json::Value;

/// Messages pushed to transfer-stream subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Sent once after the upgrade completes.
    Connected { account: String },
    /// A transfer touching the streamed account changed state.
    TransferUpdate { resource: Value },
    Pong,
}
