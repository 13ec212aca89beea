//! Expiry monitor.
//!
//! A single long-lived task owns a min-heap of `(expires_at, transfer_id)`
//! over non-terminal transfers with deadlines. Writers never touch the heap:
//! they push entries through an unbounded channel. The task sleeps until the
//! earliest deadline, then asks the engine to expire the transfer under a
//! transaction. A concurrent completion or rejection wins by serialization
//! and the entry is skipped. Closing the channel stops the monitor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::{EngineError, ExpiryOutcome, TransferEngine};
use crate::model::{paths, Transfer};
use crate::store::MemoryStore;

/// Sleep ceiling while the heap is empty.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// A deadline pushed by a transfer writer.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryEntry {
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct ExpiryMonitor {
    engine: Arc<TransferEngine>,
    rx: mpsc::UnboundedReceiver<ExpiryEntry>,
    heap: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
}

impl ExpiryMonitor {
    pub fn new(engine: Arc<TransferEngine>, rx: mpsc::UnboundedReceiver<ExpiryEntry>) -> Self {
        Self {
            engine,
            rx,
            heap: BinaryHeap::new(),
        }
    }

    /// Reload the heap from the store: every non-terminal transfer with a
    /// deadline. Called once at startup, before `run`.
    pub fn preload(&mut self, store: &MemoryStore) -> Result<usize, EngineError> {
        let entries = store
            .with_transaction(|tx| Ok::<_, EngineError>(tx.scan_prefix(&paths::transfers())))?;

        let mut reloaded = 0;
        for (path, value) in entries {
            let transfer: Transfer = match serde_json::from_value(value) {
                Ok(t) => t,
                Err(e) => {
                    error!(%path, error = %e, "skipping undecodable transfer during reload");
                    continue;
                }
            };
            if transfer.state.is_terminal() {
                continue;
            }
            if let Some(expires_at) = transfer.expires_at {
                self.heap.push(Reverse((expires_at, transfer.id)));
                reloaded += 1;
            }
        }
        Ok(reloaded)
    }

    /// Run until the sender side of the channel is dropped.
    pub async fn run(mut self) {
        info!(pending = self.heap.len(), "expiry monitor started");
        loop {
            let sleep_for = match self.heap.peek() {
                Some(Reverse((deadline, _))) => (*deadline - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO),
                None => IDLE_WAIT,
            };

            tokio::select! {
                entry = self.rx.recv() => match entry {
                    Some(entry) => {
                        debug!(transfer = %entry.id, expires_at = %entry.expires_at, "deadline tracked");
                        self.heap.push(Reverse((entry.expires_at, entry.id)));
                    }
                    None => {
                        info!("expiry channel closed; monitor stopping");
                        break;
                    }
                },
                _ = tokio::time::sleep(sleep_for) => {
                    Self::fire_due(&mut self.heap, &self.engine);
                }
            }
        }
    }

    /// Expire every heap entry whose deadline has passed.
    fn fire_due(
        heap: &mut BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
        engine: &TransferEngine,
    ) {
        let now = Utc::now();
        while let Some(Reverse((deadline, id))) = heap.peek().copied() {
            if deadline > now {
                break;
            }
            heap.pop();
            match engine.expire(id, now) {
                Ok(ExpiryOutcome::Expired(_)) => {}
                Ok(ExpiryOutcome::Skipped) => {
                    debug!(transfer = %id, "expiry skipped; transfer already settled")
                }
                Ok(ExpiryOutcome::NotDue(later)) => {
                    // The stored deadline moved; re-arm for it.
                    heap.push(Reverse((later, id)));
                }
                Err(e) => {
                    error!(transfer = %id, error = %e, "expiry failed; will retry");
                    heap.push(Reverse((now + chrono::Duration::seconds(1), id)));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_orders_by_earliest_deadline() {
        let mut heap: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>> = BinaryHeap::new();
        let now = Utc::now();
        let late = now + chrono::Duration::seconds(60);
        let soon = now + chrono::Duration::seconds(1);

        let late_id = Uuid::new_v4();
        let soon_id = Uuid::new_v4();
        heap.push(Reverse((late, late_id)));
        heap.push(Reverse((soon, soon_id)));

        let Reverse((deadline, id)) = heap.pop().unwrap();
        assert_eq!(deadline, soon);
        assert_eq!(id, soon_id);
    }
}
