//! WebSocket connection manager.
//!
//! Maps account names to their active transfer-stream connections using
//! DashMap for concurrent access. An account can hold several connections at
//! once (e.g. two operator consoles watching the same book).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::messages::WsMessage;

/// Sender half of a connection's push channel.
pub type WsSender = mpsc::UnboundedSender<WsMessage>;

/// Unique connection identifier.
pub type ConnectionId = u64;

/// Thread-safe registry of account name -> active connections.
pub struct ConnectionManager {
    connections: DashMap<String, Vec<(ConnectionId, WsSender)>>,
    next_conn_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a connection for an account; returns its id.
    pub fn add_connection(&self, account: &str, tx: WsSender) -> ConnectionId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .entry(account.to_string())
            .or_default()
            .push((conn_id, tx));
        tracing::info!(account, conn_id, "websocket connection added");
        conn_id
    }

    /// Remove a connection; cleans up empty account entries.
    pub fn remove_connection(&self, account: &str, conn_id: ConnectionId) {
        if let Some(mut senders) = self.connections.get_mut(account) {
            senders.retain(|(id, _)| *id != conn_id);
            if senders.is_empty() {
                drop(senders);
                self.connections.remove(account);
                tracing::info!(account, conn_id, "last websocket connection closed");
            } else {
                tracing::info!(account, conn_id, "websocket connection removed");
            }
        }
    }

    /// Push a message to every connection streaming `account`. Send failures
    /// mean the client went away; cleanup happens in the socket handler.
    pub fn send_to_account(&self, account: &str, message: WsMessage) {
        if let Some(senders) = self.connections.get(account) {
            for (_, tx) in senders.iter() {
                if tx.send(message.clone()).is_err() {
                    tracing::debug!(account, "websocket push to closed connection");
                }
            }
        }
    }

    /// (streamed accounts, total connections)
    pub fn stats(&self) -> (usize, usize) {
        let accounts = self.connections.len();
        let total = self.connections.iter().map(|e| e.value().len()).sum();
        (accounts, total)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
