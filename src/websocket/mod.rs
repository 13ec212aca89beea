//! Per-account transfer event streaming over WebSocket.

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::{ConnectionId, ConnectionManager, WsSender};
pub use handler::transfers_stream;
pub use messages::WsMessage;
