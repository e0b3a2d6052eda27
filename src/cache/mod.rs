//! Classification result cache
//!
//! Maps a content fingerprint to the prediction produced the first time that
//! content was classified. A hit lets the pipeline skip the worker pool
//! entirely. Cache failures are never fatal for a request: callers log them
//! and carry on as if the entry was missing.

mod memory;

pub use memory::InMemoryCache;

use crate::fingerprint::Fingerprint;
use crate::prediction::Prediction;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Key/value result cache with per-entry expiry.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Fetch a live entry. Expired entries read as `None`.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Prediction>, CacheError>;

    /// Store `prediction` under the fingerprint for `ttl`.
    async fn put(
        &self,
        fingerprint: &Fingerprint,
        prediction: &Prediction,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
