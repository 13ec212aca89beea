//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use ledgerd::auth::Principal;
use ledgerd::engine::{validation, TransferEngine, TransferPayload};
use ledgerd::expiry::ExpiryEntry;
use ledgerd::model::{paths, AccountRecord, Notification, Subscription, EVENT_TRANSFER_UPDATE};
use ledgerd::notify::{DeliveryOutcome, DeliveryTransport};
use ledgerd::store::{MemoryStore, StoreError};
use ledgerd::websocket::ConnectionManager;

pub const BASE: &str = "http://ledger.test";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<TransferEngine>,
    pub expiry_rx: mpsc::UnboundedReceiver<ExpiryEntry>,
    pub wake: Arc<Notify>,
    pub ws: Arc<ConnectionManager>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ws = Arc::new(ConnectionManager::new());
    let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
    let wake = Arc::new(Notify::new());
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        ws.clone(),
        expiry_tx,
        wake.clone(),
        BASE,
    ));
    Harness {
        store,
        engine,
        expiry_rx,
        wake,
        ws,
    }
}

pub fn provision(store: &MemoryStore, name: &str, balance: &str, is_admin: bool) {
    let record = AccountRecord {
        name: name.to_string(),
        is_admin,
        password_hash: None,
        public_key: None,
        created_at: Utc::now(),
    };
    store
        .with_transaction(|tx| {
            tx.put_json(&paths::account(name), &record)?;
            tx.put(&paths::balance(name), Value::String(balance.to_string()));
            tx.put(&paths::held(name), Value::String("0".to_string()));
            Ok::<_, StoreError>(())
        })
        .unwrap();
}

pub fn subscribe(store: &MemoryStore, owner: &str, target_uri: &str) -> Uuid {
    let subscription = Subscription {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        event: EVENT_TRANSFER_UPDATE.to_string(),
        target_uri: target_uri.to_string(),
        created_at: Utc::now(),
    };
    store
        .with_transaction(|tx| tx.put_json(&paths::subscription(owner, &subscription.id), &subscription))
        .unwrap();
    subscription.id
}

pub fn balance_of(store: &MemoryStore, name: &str) -> Decimal {
    decimal_at(store, &paths::balance(name))
}

pub fn held_of(store: &MemoryStore, name: &str) -> Decimal {
    decimal_at(store, &paths::held(name))
}

fn decimal_at(store: &MemoryStore, path: &ledgerd::store::KeyPath) -> Decimal {
    let value = store
        .with_transaction(|tx| Ok::<_, StoreError>(tx.get_opt(path)))
        .unwrap();
    match value {
        Some(Value::String(s)) => Decimal::from_str(&s).unwrap(),
        _ => Decimal::ZERO,
    }
}

/// Sum of balance + held over the named accounts.
pub fn total_value(store: &MemoryStore, names: &[&str]) -> Decimal {
    names
        .iter()
        .map(|name| balance_of(store, name) + held_of(store, name))
        .sum()
}

pub fn all_notifications(store: &MemoryStore) -> Vec<Notification> {
    store
        .with_transaction(|tx| Ok::<_, StoreError>(tx.scan_prefix(&paths::notifications())))
        .unwrap()
        .into_iter()
        .filter_map(|(_, value)| serde_json::from_value(value).ok())
        .collect()
}

pub fn principal(name: &str) -> Principal {
    Principal::new(name, false)
}

pub fn admin() -> Principal {
    Principal::new("admin", true)
}

/// Build a validated payload from a JSON body, as the gateway would.
pub fn payload(id: Uuid, body: Value) -> TransferPayload {
    validation::parse_transfer(id, body, BASE).unwrap()
}

/// In-memory delivery transport recording every POST.
pub struct RecordingTransport {
    pub accept: bool,
    pub seen: Mutex<Vec<(String, Value)>>,
}

impl RecordingTransport {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn deliver(&self, target_uri: &str, body: &Value) -> DeliveryOutcome {
        self.seen
            .lock()
            .unwrap()
            .push((target_uri.to_string(), body.clone()));
        if self.accept {
            DeliveryOutcome::Accepted
        } else {
            DeliveryOutcome::Rejected("http 503 Service Unavailable".to_string())
        }
    }
}
