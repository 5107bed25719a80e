// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Offline queue: records that could not be delivered survive in a host
//! key-value store as a JSON array, bounded drop-oldest, and are merged back
//! into the transport buffer when delivery recovers.

use crate::error::TransportError;
use crate::record::LogRecord;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use vestig_common::MutexExt;

/// Default persistence key.
pub const DEFAULT_OFFLINE_KEY: &str = "vestig:offline-queue";

const DEFAULT_OFFLINE_MAX_SIZE: usize = 100;

/// A minimal host key-value store surface.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), TransportError>;
    fn remove(&self, key: &str);
}

/// In-memory store; state dies with the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock_or_panic().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        self.entries
            .lock_or_panic()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock_or_panic().remove(key);
    }
}

/// Filesystem-backed store: one file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

#[derive(Debug, Clone)]
pub struct OfflineQueueConfig {
    pub key: String,
    /// Persisted records beyond this are dropped oldest-first.
    pub max_size: usize,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_OFFLINE_KEY.to_string(),
            max_size: DEFAULT_OFFLINE_MAX_SIZE,
        }
    }
}

/// Bounded persisted record queue over a [`KeyValueStore`].
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, config: OfflineQueueConfig) -> Self {
        Self {
            store,
            key: config.key,
            max_size: config.max_size.max(1),
        }
    }

    fn load(&self) -> Vec<LogRecord> {
        let Some(raw) = self.store.get(&self.key) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    /// Append records, dropping the oldest beyond the cap. Returns how many
    /// were dropped. Store failures are reported to the fallback, never to
    /// the caller.
    pub fn persist(&self, records: &[LogRecord]) -> usize {
        let mut all = self.load();
        all.extend(records.iter().cloned());
        let dropped = all.len().saturating_sub(self.max_size);
        if dropped > 0 {
            all.drain(..dropped);
            tracing::warn!(dropped, "offline queue overflow, oldest records dropped");
        }
        match serde_json::to_string(&all) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&self.key, &raw) {
                    tracing::warn!(error = %e, "failed to persist offline queue");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize offline queue"),
        }
        dropped
    }

    /// Drain the persisted queue.
    pub fn take_all(&self) -> Vec<LogRecord> {
        let records = self.load();
        if !records.is_empty() {
            self.store.remove(&self.key);
        }
        records
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;
    use crate::record::test_record;

    fn queue(max_size: usize) -> OfflineQueue {
        OfflineQueue::new(
            Arc::new(MemoryStore::new()),
            OfflineQueueConfig {
                key: DEFAULT_OFFLINE_KEY.to_string(),
                max_size,
            },
        )
    }

    fn records(n: usize) -> Vec<LogRecord> {
        (0..n)
            .map(|i| {
                let mut r = test_record(LogLevel::Info, None);
                r.message = format!("m{i}");
                r
            })
            .collect()
    }

    #[test]
    fn persist_and_take_round_trip() {
        let q = queue(10);
        assert_eq!(q.persist(&records(3)), 0);
        assert_eq!(q.len(), 3);
        let taken = q.take_all();
        assert_eq!(taken.len(), 3);
        assert_eq!(taken[0].message, "m0");
        assert!(q.is_empty());
    }

    #[test]
    fn appends_preserve_order() {
        let q = queue(10);
        q.persist(&records(2));
        let mut more = records(1);
        more[0].message = "later".to_string();
        q.persist(&more);
        let taken = q.take_all();
        let messages: Vec<_> = taken.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["m0", "m1", "later"]);
    }

    #[test]
    fn cap_drops_oldest() {
        let q = queue(5);
        let dropped = q.persist(&records(8));
        assert_eq!(dropped, 3);
        let taken = q.take_all();
        assert_eq!(taken.len(), 5);
        assert_eq!(taken[0].message, "m3");
        assert_eq!(taken[4].message, "m7");
    }

    #[test]
    fn corrupt_payload_resets_to_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(DEFAULT_OFFLINE_KEY, "{not json").unwrap();
        let q = OfflineQueue::new(store, OfflineQueueConfig::default());
        assert!(q.take_all().is_empty());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.set("vestig:offline-queue", "[1,2]").unwrap();
        assert_eq!(store.get("vestig:offline-queue").unwrap(), "[1,2]");
        store.remove("vestig:offline-queue");
        assert!(store.get("vestig:offline-queue").is_none());
    }
}
