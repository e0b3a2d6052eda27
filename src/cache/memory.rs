//! In-process result cache backed by `DashMap`.
//!
//! Values are kept serialized, exactly as an external key/value store would
//! hold them, so a round trip through the cache behaves the same regardless
//! of backend. Expired entries are dropped lazily on read and swept by
//! [`InMemoryCache::purge_loop`].

use super::{CacheError, ResultCache};
use crate::fingerprint::Fingerprint;
use crate::prediction::Prediction;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Expiry used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3_600);

fn expiry(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Thread-safe TTL cache keyed by `nsfw:<sha256>`.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_key, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Sweep expired entries every `interval` until cancelled.
    pub async fn purge_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Cache purge task starting");
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = self.purge_expired();
                    if purged > 0 {
                        debug!(purged, remaining = self.len(), "Purged expired cache entries");
                    }
                }
            }
        }

        info!("Cache purge task stopped");
    }
}

#[async_trait]
impl ResultCache for InMemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Prediction>, CacheError> {
        let key = fingerprint.cache_key();

        let value = match self.entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        // The read guard is released above; removing while holding it would deadlock.
        let Some(value) = value else {
            self.entries
                .remove_if(&key, |_, entry| entry.expires_at <= Instant::now());
            return Ok(None);
        };

        serde_json::from_str(&value)
            .map(Some)
            .map_err(|e| CacheError::Corrupt(format!("{key}: {e}")))
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        prediction: &Prediction,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_string(prediction)
            .map_err(|e| CacheError::Unavailable(format!("serialize: {e}")))?;

        self.entries.insert(
            fingerprint.cache_key(),
            Entry {
                value,
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
