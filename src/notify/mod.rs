//! Notification delivery.
//!
//! Pending notifications are inserted by the engine inside the transfer
//! transition's transaction. A small fixed pool of [`worker::NotificationWorker`]s
//! claims them via transactional CAS (`pending -> in_flight`) and delivers an
//! HTTP POST of the transfer snapshot to the subscription's target, retrying
//! with capped exponential backoff and abandoning after a configured maximum.

pub mod worker;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use worker::NotificationWorker;

/// Notification worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Worker pool size (N >= 1).
    pub workers: usize,
    /// Attempts before a notification is abandoned.
    pub max_attempts: u32,
    /// First retry delay.
    pub backoff_base_ms: u64,
    /// Retry delay ceiling.
    pub backoff_ceiling_ms: u64,
    /// Per-attempt HTTP timeout.
    pub delivery_timeout_ms: u64,
    /// Idle poll interval between claim sweeps.
    pub poll_interval_ms: u64,
    /// Notifications claimed per sweep.
    pub claim_batch: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 10,
            backoff_base_ms: 1_000,
            backoff_ceiling_ms: 60_000,
            delivery_timeout_ms: 10_000,
            poll_interval_ms: 500,
            claim_batch: 16,
        }
    }
}

/// Retry delay after `attempts` failed deliveries: exponential, capped.
pub fn backoff(config: &NotifyConfig, attempts: u32) -> chrono::Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    let delay_ms = config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_ceiling_ms);
    chrono::Duration::milliseconds(delay_ms as i64)
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The target acknowledged with a 2xx.
    Accepted,
    /// Non-2xx response or transport failure.
    Rejected(String),
}

/// Delivery channel to subscription targets. Trait object so tests can
/// substitute an in-memory transport.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, target_uri: &str, body: &Value) -> DeliveryOutcome;
}

/// HTTP POST delivery with a per-attempt timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, target_uri: &str, body: &Value) -> DeliveryOutcome {
        match self.client.post(target_uri).json(body).send().await {
            Ok(response) if response.status().is_success() => DeliveryOutcome::Accepted,
            Ok(response) => DeliveryOutcome::Rejected(format!("http {}", response.status())),
            Err(e) => DeliveryOutcome::Rejected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = NotifyConfig {
            backoff_base_ms: 1_000,
            backoff_ceiling_ms: 60_000,
            ..NotifyConfig::default()
        };
        assert_eq!(backoff(&config, 1).num_milliseconds(), 1_000);
        assert_eq!(backoff(&config, 2).num_milliseconds(), 2_000);
        assert_eq!(backoff(&config, 3).num_milliseconds(), 4_000);
        assert_eq!(backoff(&config, 7).num_milliseconds(), 60_000);
        // Far past the ceiling, including shift-overflow territory.
        assert_eq!(backoff(&config, 64).num_milliseconds(), 60_000);
    }
}
