use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use ledgerd::auth::{hash_password, ReceiptSigner};
use ledgerd::config::AppConfig;
use ledgerd::engine::TransferEngine;
use ledgerd::expiry::ExpiryMonitor;
use ledgerd::gateway::{self, state::AppState};
use ledgerd::logging;
use ledgerd::model::{paths, AccountRecord};
use ledgerd::notify::{HttpTransport, NotificationWorker};
use ledgerd::store::{MemoryStore, StoreError};
use ledgerd::websocket::ConnectionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let env = std::env::var("LEDGER_ENV").unwrap_or_else(|_| "default".to_string());
    let config = AppConfig::load(&env)?;
    let _guard = logging::init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        env = %env,
        "ledgerd starting"
    );

    let store = Arc::new(MemoryStore::new());
    bootstrap_admin(&store, &config)?;

    let ws_manager = Arc::new(ConnectionManager::new());
    let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
    let delivery_wake = Arc::new(Notify::new());

    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        ws_manager.clone(),
        expiry_tx,
        delivery_wake.clone(),
        config.base_uri.clone(),
    ));

    let mut monitor = ExpiryMonitor::new(engine.clone(), expiry_rx);
    let reloaded = monitor.preload(&store)?;
    info!(reloaded, "expiry heap reloaded from store");
    tokio::spawn(monitor.run());

    let transport = Arc::new(
        HttpTransport::new(Duration::from_millis(
            config.notifications.delivery_timeout_ms,
        ))
        .context("Failed to build notification HTTP client")?,
    );
    for _ in 0..config.notifications.workers {
        let worker = NotificationWorker::new(
            store.clone(),
            transport.clone(),
            config.notifications.clone(),
            delivery_wake.clone(),
            config.base_uri.clone(),
        );
        tokio::spawn(worker.run());
    }

    let receipt_signer = match &config.signing_key {
        Some(seed) => ReceiptSigner::from_seed_hex(seed, config.base_uri.clone())
            .map_err(|e| anyhow::anyhow!("Invalid signing_key: {e}"))?,
        None => {
            warn!("no signing_key configured; state receipts use an ephemeral key");
            ReceiptSigner::generate(config.base_uri.clone())
        }
    };

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = Arc::new(AppState {
        store,
        engine,
        ws_manager,
        receipt_signer: Arc::new(receipt_signer),
        config: Arc::new(config),
    });

    gateway::run_server(state, &host, port).await
}

/// Provision the admin account from config if it does not exist yet.
fn bootstrap_admin(store: &MemoryStore, config: &AppConfig) -> Result<()> {
    let Some(password) = &config.admin.password else {
        warn!("no admin.password configured; admin account not provisioned");
        return Ok(());
    };
    let name = config.admin.name.clone();
    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Hashing failed: {e}"))?;
    let now = chrono::Utc::now();

    let created = store.with_transaction(|tx| {
        if tx.get_opt(&paths::account(&name)).is_some() {
            return Ok::<_, StoreError>(false);
        }
        let record = AccountRecord {
            name: name.clone(),
            is_admin: true,
            password_hash: Some(password_hash.clone()),
            public_key: None,
            created_at: now,
        };
        tx.put_json(&paths::account(&name), &record)?;
        tx.put(&paths::balance(&name), serde_json::Value::String("0".into()));
        tx.put(&paths::held(&name), serde_json::Value::String("0".into()));
        Ok(true)
    })?;

    if created {
        info!(account = %name, "admin account provisioned");
    }
    Ok(())
}
