//! In-memory transactional key-path store.
//!
//! Concurrency control is optimistic: a transaction records the version of
//! every path it reads (0 for an absent path) and buffers its writes. Commit
//! takes the store write lock, validates every recorded version against the
//! current shelf, and applies the buffer atomically. Validation failure is a
//! [`StoreError::Conflict`]; [`MemoryStore::with_transaction`] retries a
//! bounded number of times before surfacing it.
//!
//! Read-only transactions never conflict: commit is a no-op when the write
//! buffer is empty.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{StoreError, StoreResult};
use super::path::KeyPath;

/// Commit attempts before a conflict is surfaced to the caller.
pub const MAX_COMMIT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    value: Value,
}

/// The shared key-path store. All durable records live here.
#[derive(Debug, Default)]
pub struct MemoryStore {
    shelf: RwLock<BTreeMap<KeyPath, Versioned>>,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction. Prefer [`MemoryStore::with_transaction`], which
    /// handles commit and conflict retry.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Run `f` inside a transaction, committing on success. Retries up to
    /// [`MAX_COMMIT_ATTEMPTS`] times on commit conflict; business errors
    /// returned by `f` abort immediately and discard the write buffer.
    pub fn with_transaction<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let mut tx = self.begin();
            let out = f(&mut tx)?;
            match tx.commit() {
                Ok(()) => return Ok(out),
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict.into())
    }
}

/// A transaction over the store: snapshot-validated reads, buffered writes.
pub struct Transaction<'a> {
    store: &'a MemoryStore,
    /// Path -> version observed at first read (0 = absent).
    reads: HashMap<KeyPath, u64>,
    /// Buffered writes; `None` is a delete.
    writes: BTreeMap<KeyPath, Option<Value>>,
}

impl Transaction<'_> {
    fn observe(&mut self, path: &KeyPath, version: u64) {
        self.reads.entry(path.clone()).or_insert(version);
    }

    /// Read a value, `None` when absent. Sees this transaction's own writes.
    pub fn get_opt(&mut self, path: &KeyPath) -> Option<Value> {
        if let Some(buffered) = self.writes.get(path) {
            return buffered.clone();
        }
        let shelf = self.store.shelf.read().unwrap();
        match shelf.get(path) {
            Some(v) => {
                let (version, value) = (v.version, v.value.clone());
                drop(shelf);
                self.observe(path, version);
                Some(value)
            }
            None => {
                drop(shelf);
                self.observe(path, 0);
                None
            }
        }
    }

    pub fn get(&mut self, path: &KeyPath) -> StoreResult<Value> {
        self.get_opt(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    pub fn get_json<T: DeserializeOwned>(&mut self, path: &KeyPath) -> StoreResult<T> {
        let value = self.get(path)?;
        serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn get_json_opt<T: DeserializeOwned>(&mut self, path: &KeyPath) -> StoreResult<Option<T>> {
        match self.get_opt(path) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                StoreError::Corrupt {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Upsert a value.
    pub fn put(&mut self, path: &KeyPath, value: Value) {
        self.writes.insert(path.clone(), Some(value));
    }

    pub fn put_json<T: Serialize>(&mut self, path: &KeyPath, value: &T) -> StoreResult<()> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.put(path, value);
        Ok(())
    }

    /// Insert a value, failing when the path already holds one.
    pub fn create(&mut self, path: &KeyPath, value: Value) -> StoreResult<()> {
        if self.get_opt(path).is_some() {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        self.put(path, value);
        Ok(())
    }

    /// Delete a value. Deleting an absent path is a no-op; the read is still
    /// recorded so the absence is validated at commit.
    pub fn delete(&mut self, path: &KeyPath) {
        let _ = self.get_opt(path);
        self.writes.insert(path.clone(), None);
    }

    /// All entries under `prefix`, overlaid with this transaction's writes.
    /// Versions of matched committed entries are recorded for validation.
    pub fn scan_prefix(&mut self, prefix: &KeyPath) -> Vec<(KeyPath, Value)> {
        let mut merged: BTreeMap<KeyPath, Value> = BTreeMap::new();
        let mut observed: Vec<(KeyPath, u64)> = Vec::new();
        {
            let shelf = self.store.shelf.read().unwrap();
            for (path, versioned) in shelf.range(prefix.clone()..) {
                if !path.starts_with(prefix) {
                    break;
                }
                observed.push((path.clone(), versioned.version));
                merged.insert(path.clone(), versioned.value.clone());
            }
        }
        for (path, version) in observed {
            self.observe(&path, version);
        }
        for (path, write) in &self.writes {
            if !path.starts_with(prefix) {
                continue;
            }
            match write {
                Some(value) => {
                    merged.insert(path.clone(), value.clone());
                }
                None => {
                    merged.remove(path);
                }
            }
        }
        merged.into_iter().collect()
    }

    /// Validate recorded reads and apply buffered writes atomically.
    pub fn commit(self) -> StoreResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut shelf = self.store.shelf.write().unwrap();
        for (path, seen) in &self.reads {
            let current = shelf.get(path).map(|v| v.version).unwrap_or(0);
            if current != *seen {
                return Err(StoreError::Conflict);
            }
        }
        let version = self.store.commits.fetch_add(1, Ordering::SeqCst) + 1;
        for (path, write) in self.writes {
            match write {
                Some(value) => {
                    shelf.insert(path, Versioned { version, value });
                }
                None => {
                    shelf.remove(&path);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> KeyPath {
        KeyPath::new(segments.iter().copied())
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        store
            .with_transaction(|tx| {
                tx.put(&path(&["people", "alice"]), json!({"name": "alice"}));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let got = store
            .with_transaction(|tx| tx.get(&path(&["people", "alice"])))
            .unwrap();
        assert_eq!(got, json!({"name": "alice"}));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .with_transaction(|tx| tx.get(&path(&["transfers", "nope"])))
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("transfers/nope".to_string()));
    }

    #[test]
    fn test_create_fails_when_present() {
        let store = MemoryStore::new();
        store
            .with_transaction(|tx| tx.create(&path(&["a"]), json!(1)))
            .unwrap();
        let err = store
            .with_transaction(|tx| tx.create(&path(&["a"]), json!(2)))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_delete_then_get() {
        let store = MemoryStore::new();
        store
            .with_transaction(|tx| {
                tx.put(&path(&["a"]), json!(1));
                Ok::<_, StoreError>(())
            })
            .unwrap();
        store
            .with_transaction(|tx| {
                tx.delete(&path(&["a"]));
                Ok::<_, StoreError>(())
            })
            .unwrap();
        let got = store
            .with_transaction(|tx| Ok::<_, StoreError>(tx.get_opt(&path(&["a"]))))
            .unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn test_transaction_sees_own_writes() {
        let store = MemoryStore::new();
        store
            .with_transaction(|tx| {
                tx.put(&path(&["a"]), json!(1));
                assert_eq!(tx.get_opt(&path(&["a"])), Some(json!(1)));
                tx.delete(&path(&["a"]));
                assert_eq!(tx.get_opt(&path(&["a"])), None);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_failed_transaction_discards_buffer() {
        let store = MemoryStore::new();
        let result: Result<(), StoreError> = store.with_transaction(|tx| {
            tx.put(&path(&["a"]), json!(1));
            Err(StoreError::NotFound("forced".into()))
        });
        assert!(result.is_err());
        let got = store
            .with_transaction(|tx| Ok::<_, StoreError>(tx.get_opt(&path(&["a"]))))
            .unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn test_scan_prefix_with_overlay() {
        let store = MemoryStore::new();
        store
            .with_transaction(|tx| {
                tx.put(&path(&["people", "alice", "balance"]), json!("100"));
                tx.put(&path(&["people", "bob", "balance"]), json!("0"));
                tx.put(&path(&["transfers", "t1"]), json!({}));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let entries = store
            .with_transaction(|tx| {
                tx.delete(&path(&["people", "bob", "balance"]));
                tx.put(&path(&["people", "carol", "balance"]), json!("7"));
                Ok::<_, StoreError>(tx.scan_prefix(&path(&["people"])))
            })
            .unwrap();
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(
            keys,
            vec!["people/alice/balance", "people/carol/balance"]
        );
    }

    #[test]
    fn test_conflicting_commit_is_detected() {
        let store = MemoryStore::new();
        store
            .with_transaction(|tx| {
                tx.put(&path(&["counter"]), json!(0));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        // First transaction reads, then a second commits before it does.
        let mut tx1 = store.begin();
        let _ = tx1.get(&path(&["counter"])).unwrap();
        tx1.put(&path(&["counter"]), json!(1));

        let mut tx2 = store.begin();
        let _ = tx2.get(&path(&["counter"])).unwrap();
        tx2.put(&path(&["counter"]), json!(2));
        tx2.commit().unwrap();

        assert_eq!(tx1.commit(), Err(StoreError::Conflict));
    }

    #[test]
    fn test_with_transaction_retries_conflicts() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        store
            .with_transaction(|tx| {
                tx.put(&path(&["counter"]), json!(0));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    // Bounded retries can still be exhausted under this much
                    // deliberate contention; loop until the increment lands.
                    loop {
                        let result = store.with_transaction(|tx| {
                            let current = tx.get(&path(&["counter"]))?;
                            let n = current.as_i64().unwrap_or(0);
                            tx.put(&path(&["counter"]), json!(n + 1));
                            Ok::<_, StoreError>(())
                        });
                        match result {
                            Ok(()) => break,
                            Err(StoreError::Conflict) => continue,
                            Err(e) => panic!("unexpected store error: {e}"),
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let got = store
            .with_transaction(|tx| tx.get(&path(&["counter"])))
            .unwrap();
        assert_eq!(got, json!(400));
    }

    #[test]
    fn test_read_only_transaction_never_conflicts() {
        let store = MemoryStore::new();
        let mut tx1 = store.begin();
        let _ = tx1.get_opt(&path(&["a"]));

        store
            .with_transaction(|tx| {
                tx.put(&path(&["a"]), json!(1));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        assert_eq!(tx1.commit(), Ok(()));
    }
}
