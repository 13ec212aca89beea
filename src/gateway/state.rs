//! Shared application state.
//!
//! The explicit module record injected at construction; no process-wide
//! singletons beyond this.

use std::sync::Arc;

use crate::auth::ReceiptSigner;
use crate::config::AppConfig;
use crate::engine::TransferEngine;
use crate::store::MemoryStore;
use crate::websocket::ConnectionManager;

pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<TransferEngine>,
    pub ws_manager: Arc<ConnectionManager>,
    pub receipt_signer: Arc<ReceiptSigner>,
    pub config: Arc<AppConfig>,
}
