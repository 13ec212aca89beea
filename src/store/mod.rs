//! Transactional key-path store.
//!
//! All durable records (accounts, balances, transfers, subscriptions,
//! notifications) live in one key-path store. Keys are ordered segment paths
//! (`people/alice/balance`), values are JSON documents. Every mutation flows
//! through [`MemoryStore::with_transaction`]: reads are validated and writes
//! applied atomically at commit, so no partial balance change is ever
//! observable.

pub mod error;
pub mod memory;
pub mod path;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, Transaction, MAX_COMMIT_ATTEMPTS};
pub use path::KeyPath;
