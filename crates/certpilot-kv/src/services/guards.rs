//! Policy helpers layered over the counter store: rate windows, duplicate
//! submission suppression and bounded retry counters.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use crate::error::KvError;
use crate::services::CounterStore;

/// Sliding-window request limiter (per ip, per credential, ...).
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window_seconds: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window_seconds: i64) -> Self {
        Self {
            store,
            limit,
            window_seconds,
        }
    }

    /// Record one hit for `key` and report whether it stays inside the
    /// window's limit.
    pub async fn allow(&self, key: &str) -> Result<bool, KvError> {
        let count = self
            .store
            .increment(&format!("ratelimit_{}", key), self.window_seconds)
            .await?;
        if count > self.limit {
            warn!("rate limit exceeded for {} ({}/{})", key, count, self.limit);
        }
        Ok(count <= self.limit)
    }
}

/// Suppresses repeating the same action with the same parameter hash
/// inside a short window.
pub struct DuplicateGuard {
    store: Arc<dyn CounterStore>,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Returns the seconds remaining before the same submission is allowed
    /// again; 0 means it may proceed (and stamps the window).
    pub async fn remaining(&self, fingerprint: &str, expire_seconds: i64) -> Result<i64, KvError> {
        let key = format!("dup_{}", fingerprint);
        let now = Utc::now().timestamp();

        if let Some(stamped) = self.store.get(&key).await? {
            let last: i64 = stamped.parse().map_err(|e: std::num::ParseIntError| {
                KvError::InvalidValue {
                    key: key.clone(),
                    details: e.to_string(),
                }
            })?;
            let remaining = last + expire_seconds - now;
            return Ok(remaining.clamp(0, expire_seconds));
        }

        self.store
            .put(&key, &now.to_string(), expire_seconds)
            .await?;
        Ok(0)
    }
}

/// Caps how often an automatic follow-up may fire for one order+operation,
/// so a failure loop cannot spin forever.
pub struct RetryGuard {
    store: Arc<dyn CounterStore>,
}

const RETRY_WINDOW_SECONDS: i64 = 86400;

impl RetryGuard {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub async fn should_retry(
        &self,
        order_id: i64,
        operation: &str,
        reason: &str,
        max_retries: u64,
    ) -> Result<bool, KvError> {
        let key = format!("retry_{}_{}_{}", operation, order_id, reason);
        let count = self.store.increment(&key, RETRY_WINDOW_SECONDS).await?;
        Ok(count <= max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryCounterStore;

    #[tokio::test]
    async fn rate_limiter_caps_hits() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store, 3, 60);
        assert!(limiter.allow("1.2.3.4").await.unwrap());
        assert!(limiter.allow("1.2.3.4").await.unwrap());
        assert!(limiter.allow("1.2.3.4").await.unwrap());
        assert!(!limiter.allow("1.2.3.4").await.unwrap());
        // Other keys are unaffected.
        assert!(limiter.allow("5.6.7.8").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_guard_blocks_within_window() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = DuplicateGuard::new(store);
        assert_eq!(guard.remaining("new_abc123", 60).await.unwrap(), 0);
        let remaining = guard.remaining("new_abc123", 60).await.unwrap();
        assert!(remaining > 0 && remaining <= 60);
        // Different fingerprint passes.
        assert_eq!(guard.remaining("new_def456", 60).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_guard_stops_after_max() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = RetryGuard::new(store);
        for _ in 0..5 {
            assert!(guard.should_retry(9, "commit", "timeout", 5).await.unwrap());
        }
        assert!(!guard.should_retry(9, "commit", "timeout", 5).await.unwrap());
    }
}
