//! ledgerd - Transactional Ledger Service
//!
//! An authenticated bookkeeping engine that moves value between accounts
//! under a well-defined transfer lifecycle: conservation of value,
//! idempotent updates, conditional settlement, time-bounded holds, and
//! event notification to interested parties.
//!
//! # Modules
//!
//! - [`store`] - Transactional key-path store (the only shared mutable state)
//! - [`model`] - Durable records and the key layout
//! - [`engine`] - Transfer state machine and balance application
//! - [`expiry`] - Deadline monitor (min-heap + timer task)
//! - [`notify`] - Subscription notification delivery workers
//! - [`auth`] - Authentication gate and authorization checks
//! - [`gateway`] - HTTP surface (axum)
//! - [`websocket`] - Per-account transfer streaming
//! - [`config`] - YAML configuration with env overrides

pub mod auth;
pub mod config;
pub mod engine;
pub mod expiry;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod notify;
pub mod store;
pub mod websocket;

// Convenient re-exports at crate root
pub use auth::Principal;
pub use config::AppConfig;
pub use engine::{EngineError, TransferEngine, TransferState};
pub use expiry::{ExpiryEntry, ExpiryMonitor};
pub use model::{AccountRecord, Transfer};
pub use notify::NotificationWorker;
pub use store::{KeyPath, MemoryStore};
