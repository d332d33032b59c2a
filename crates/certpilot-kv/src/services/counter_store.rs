use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use certpilot_core::UtcDateTime;

use crate::error::KvError;

/// Key/value store with per-key expiry plus an atomic windowed counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch a live value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store a value that expires after `ttl_seconds`.
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Increment the counter under `key`, starting a fresh window of
    /// `ttl_seconds` when the key is absent or expired. Returns the count
    /// inside the current window.
    async fn increment(&self, key: &str, ttl_seconds: i64) -> Result<u64, KvError>;
}

struct Entry {
    value: String,
    expires_at: UtcDateTime,
}

/// In-process implementation. Entries are reaped lazily on access.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), KvError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::seconds(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_seconds: i64) -> Result<u64, KvError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let count = match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                entry.value.parse::<u64>().map_err(|e| KvError::InvalidValue {
                    key: key.to_string(),
                    details: e.to_string(),
                })? + 1
            }
            _ => 1,
        };

        let expires_at = match entries.get(key) {
            // Keep the original window; a fresh one starts only when the
            // key was absent or expired.
            Some(entry) if entry.expires_at > now => entry.expires_at,
            _ => now + Duration::seconds(ttl_seconds),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryCounterStore::new();
        store.put("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryCounterStore::new();
        store.put("k", "v", -1).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_counts_within_window() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment("c", 60).await.unwrap(), 1);
        assert_eq!(store.increment("c", 60).await.unwrap(), 2);
        assert_eq!(store.increment("c", 60).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn increment_restarts_after_expiry() {
        let store = MemoryCounterStore::new();
        store.put("c", "5", -1).await.unwrap();
        assert_eq!(store.increment("c", 60).await.unwrap(), 1);
    }
}
