//! Notification worker.
//!
//! Claims due pending notifications in FIFO order by `next_attempt_at` and
//! delivers them. Claims go through the store's transaction, so a pool of
//! workers never double-delivers: the first claim flips `pending` to
//! `in_flight`, and a competing claim conflicts and retries against the new
//! state. Delivery failures only ever touch the notification record; the
//! transfer itself is not affected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::{backoff, DeliveryOutcome, DeliveryTransport, NotifyConfig};
use crate::engine::EngineError;
use crate::model::{paths, Notification, NotificationState};
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct NotificationWorker {
    store: Arc<MemoryStore>,
    transport: Arc<dyn DeliveryTransport>,
    config: NotifyConfig,
    wake: Arc<Notify>,
    base_uri: String,
}

impl NotificationWorker {
    pub fn new(
        store: Arc<MemoryStore>,
        transport: Arc<dyn DeliveryTransport>,
        config: NotifyConfig,
        wake: Arc<Notify>,
        base_uri: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            wake,
            base_uri: base_uri.into(),
        }
    }

    /// Run forever: claim, deliver, sleep until woken or the poll interval
    /// elapses.
    pub async fn run(self) {
        info!(
            max_attempts = self.config.max_attempts,
            poll_interval_ms = self.config.poll_interval_ms,
            "notification worker started"
        );
        let poll = std::time::Duration::from_millis(self.config.poll_interval_ms);
        loop {
            let claimed = match self.claim_due(Utc::now()) {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(error = %e, "notification claim sweep failed");
                    Vec::new()
                }
            };
            if claimed.is_empty() {
                let _ = tokio::time::timeout(poll, self.wake.notified()).await;
                continue;
            }
            for notification in claimed {
                self.attempt(notification).await;
            }
        }
    }

    /// Claim up to `claim_batch` due pending notifications, oldest first.
    fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Notification>, EngineError> {
        self.store.with_transaction(|tx| {
            let mut due: Vec<Notification> = tx
                .scan_prefix(&paths::notifications())
                .into_iter()
                .filter_map(|(path, value)| match serde_json::from_value(value) {
                    Ok(notification) => Some(notification),
                    Err(e) => {
                        warn!(%path, error = %e, "skipping undecodable notification");
                        None
                    }
                })
                .filter(|n: &Notification| {
                    n.state == NotificationState::Pending && n.next_attempt_at <= now
                })
                .collect();
            due.sort_by(|a, b| {
                (a.next_attempt_at, a.created_at, a.id).cmp(&(b.next_attempt_at, b.created_at, b.id))
            });
            due.truncate(self.config.claim_batch);

            for notification in &mut due {
                notification.state = NotificationState::InFlight;
                tx.put_json(&paths::notification(&notification.id), notification)?;
            }
            Ok(due)
        })
    }

    /// Deliver one claimed notification and record the outcome.
    async fn attempt(&self, mut notification: Notification) {
        let body = json!({
            "event": notification.event,
            "id": notification.id,
            "subscription": notification.subscription_id,
            "resource": notification.transfer.external(&self.base_uri),
        });
        let outcome = self
            .transport
            .deliver(&notification.target_uri, &body)
            .await;
        let now = Utc::now();

        notification.attempts += 1;
        match outcome {
            DeliveryOutcome::Accepted => {
                notification.state = NotificationState::Delivered;
                debug!(
                    notification = %notification.id,
                    attempts = notification.attempts,
                    "notification delivered"
                );
            }
            DeliveryOutcome::Rejected(reason) => {
                if notification.attempts >= self.config.max_attempts {
                    notification.state = NotificationState::Abandoned;
                    warn!(
                        notification = %notification.id,
                        attempts = notification.attempts,
                        reason,
                        "notification abandoned"
                    );
                } else {
                    notification.state = NotificationState::Pending;
                    notification.next_attempt_at = now + backoff(&self.config, notification.attempts);
                    debug!(
                        notification = %notification.id,
                        attempts = notification.attempts,
                        next_attempt_at = %notification.next_attempt_at,
                        reason,
                        "notification delivery failed; re-queued"
                    );
                }
            }
        }

        let result: Result<(), EngineError> = self.store.with_transaction(|tx| {
            tx.put_json(&paths::notification(&notification.id), &notification)?;
            Ok(())
        });
        if let Err(e) = result {
            error!(notification = %notification.id, error = %e, "failed to record delivery outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationFund, Transfer};
    use crate::engine::TransferState;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingTransport {
        accept: bool,
        seen: Mutex<Vec<(String, Value)>>,
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
                DeliveryOutcome::Rejected("http 500 Internal Server Error".into())
            }
        }
    }

    fn pending_notification(now: DateTime<Utc>) -> Notification {
        let transfer = Transfer {
            id: Uuid::new_v4(),
            source_funds: vec![],
            destination_funds: vec![DestinationFund {
                account: "bob".into(),
                amount: "1".parse().unwrap(),
            }],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: None,
            state: TransferState::Completed,
            created_at: now,
            updated_at: now,
        };
        Notification {
            id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            target_uri: "http://hooks.example/transfer".into(),
            event: crate::model::EVENT_TRANSFER_UPDATE.into(),
            transfer,
            attempts: 0,
            next_attempt_at: now,
            state: NotificationState::Pending,
            created_at: now,
        }
    }

    fn worker(store: Arc<MemoryStore>, transport: Arc<RecordingTransport>) -> NotificationWorker {
        NotificationWorker::new(
            store,
            transport,
            NotifyConfig {
                max_attempts: 3,
                ..NotifyConfig::default()
            },
            Arc::new(Notify::new()),
            "http://ledger.example",
        )
    }

    fn seed(store: &MemoryStore, notification: &Notification) {
        store
            .with_transaction(|tx| {
                tx.put_json(&paths::notification(&notification.id), notification)
            })
            .unwrap();
    }

    fn load(store: &MemoryStore, id: &Uuid) -> Notification {
        store
            .with_transaction(|tx| tx.get_json::<Notification>(&paths::notification(id)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_delivery_marks_delivered() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport {
            accept: true,
            seen: Mutex::new(Vec::new()),
        });
        let worker = worker(store.clone(), transport.clone());

        let now = Utc::now();
        let notification = pending_notification(now);
        seed(&store, &notification);

        let claimed = worker.claim_due(now).unwrap();
        assert_eq!(claimed.len(), 1);
        for n in claimed {
            worker.attempt(n).await;
        }

        let stored = load(&store, &notification.id);
        assert_eq!(stored.state, NotificationState::Delivered);
        assert_eq!(stored.attempts, 1);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "http://hooks.example/transfer");
        assert_eq!(seen[0].1["event"], "transfer.update");
        assert_eq!(seen[0].1["resource"]["state"], "completed");
    }

    #[tokio::test]
    async fn test_failed_delivery_requeues_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport {
            accept: false,
            seen: Mutex::new(Vec::new()),
        });
        let worker = worker(store.clone(), transport.clone());

        let now = Utc::now();
        let notification = pending_notification(now);
        seed(&store, &notification);

        let claimed = worker.claim_due(now).unwrap();
        for n in claimed {
            worker.attempt(n).await;
        }

        let stored = load(&store, &notification.id);
        assert_eq!(stored.state, NotificationState::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at > now);

        // Not due yet: nothing to claim.
        assert!(worker.claim_due(Utc::now()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_abandon() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport {
            accept: false,
            seen: Mutex::new(Vec::new()),
        });
        let worker = worker(store.clone(), transport.clone());

        let now = Utc::now();
        let mut notification = pending_notification(now);
        notification.attempts = 2; // one short of max_attempts = 3
        seed(&store, &notification);

        let claimed = worker.claim_due(now).unwrap();
        for n in claimed {
            worker.attempt(n).await;
        }

        let stored = load(&store, &notification.id);
        assert_eq!(stored.state, NotificationState::Abandoned);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_claim_skips_in_flight_and_terminal() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport {
            accept: true,
            seen: Mutex::new(Vec::new()),
        });
        let worker = worker(store.clone(), transport);

        let now = Utc::now();
        for state in [
            NotificationState::InFlight,
            NotificationState::Delivered,
            NotificationState::Abandoned,
        ] {
            let mut n = pending_notification(now);
            n.state = state;
            seed(&store, &n);
        }

        assert!(worker.claim_due(now).unwrap().is_empty());
    }
}
