//! Classified-item persistence
//!
//! Every successfully classified upload becomes one durable record keyed by
//! its content fingerprint. Backends implement [`UploadRepository`]:
//! - `SledUploadStore`: embedded durable store
//! - `InMemoryUploadStore`: for tests and throwaway deployments
//!
//! The trait is synchronous. Async callers go through [`blocking_call`], which
//! runs the operation on the blocking pool under a short timeout.

mod memory;
mod sled_store;

pub use memory::InMemoryUploadStore;
pub use sled_store::SledUploadStore;

use crate::fingerprint::Fingerprint;
use crate::prediction::Prediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Review label value before any human review happened.
pub const UNLABELED: &str = "unlabeled";

// ============================================================================
// Records
// ============================================================================

/// Binary content label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "NSFW")]
    Nsfw,
    #[serde(rename = "SFW")]
    Sfw,
}

impl Label {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nsfw => "NSFW",
            Self::Sfw => "SFW",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NSFW" => Ok(Self::Nsfw),
            "SFW" => Ok(Self::Sfw),
            other => Err(format!("unknown label '{other}'")),
        }
    }
}

/// Durable record of one classified upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub id: u64,
    #[serde(rename = "filepath")]
    pub file_path: String,
    #[serde(rename = "filehash")]
    pub file_hash: String,
    /// Dominant label assigned by the classifier
    pub label: Label,
    /// Label assigned during review, `"unlabeled"` until then
    pub new_label: String,
    /// Score of the dominant label
    pub confidence: f32,
    pub reviewed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload; the backend assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClassifiedItem {
    pub file_path: String,
    pub file_hash: Fingerprint,
    pub label: Label,
    pub confidence: f32,
}

impl NewClassifiedItem {
    pub fn from_prediction(prediction: &Prediction, fingerprint: Fingerprint, file_path: String) -> Self {
        Self {
            file_path,
            file_hash: fingerprint,
            label: if prediction.is_nsfw() { Label::Nsfw } else { Label::Sfw },
            confidence: prediction.confidence(),
        }
    }

    pub(crate) fn into_record(self, id: u64, now: DateTime<Utc>) -> ClassifiedItem {
        ClassifiedItem {
            id,
            file_path: self.file_path,
            file_hash: self.file_hash.as_str().to_string(),
            label: self.label,
            new_label: UNLABELED.to_string(),
            confidence: self.confidence,
            reviewed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of an insert. A duplicate fingerprint is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(ClassifiedItem),
    Duplicate,
}

/// Aggregate review statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub reviewed: usize,
    pub unreviewed: usize,
    /// Mean confidence over all records (0 when empty)
    pub average_confidence: f64,
}

impl ReviewStats {
    pub(crate) fn from_items<'a>(items: impl Iterator<Item = &'a ClassifiedItem>) -> Self {
        let mut stats = Self::default();
        let mut confidence_sum = 0.0_f64;

        for item in items {
            if item.reviewed {
                stats.reviewed += 1;
            } else {
                stats.unreviewed += 1;
            }
            confidence_sum += f64::from(item.confidence);
        }

        let total = stats.reviewed + stats.unreviewed;
        if total > 0 {
            stats.average_confidence = confidence_sum / total as f64;
        }
        stats
    }
}

/// `true` when `item` passes an optional reviewed filter.
pub(crate) fn matches_reviewed(item: &ClassifiedItem, reviewed: Option<bool>) -> bool {
    reviewed.map_or(true, |r| item.reviewed == r)
}

// ============================================================================
// Repository contract
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage operation '{0}' timed out")]
    Timeout(&'static str),
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Durable store of classified items, unique by fingerprint.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait UploadRepository: Send + Sync {
    /// Insert a record. A record with the same fingerprint already present
    /// yields [`InsertOutcome::Duplicate`] and leaves the store unchanged.
    fn insert_classified_item(&self, item: NewClassifiedItem) -> Result<InsertOutcome, StorageError>;

    /// Public path of the stored file for a fingerprint
    fn find_path_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<String>, StorageError>;

    /// Set the review label and mark reviewed. Returns rows affected (0 or 1).
    fn update_label(&self, fingerprint: &Fingerprint, label: Label) -> Result<usize, StorageError>;

    /// Returns rows affected (0 or 1).
    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<usize, StorageError>;

    /// Records with `id > cursor`, newest first, at most `limit`.
    fn list_page(
        &self,
        cursor: u64,
        limit: usize,
        reviewed: Option<bool>,
    ) -> Result<Vec<ClassifiedItem>, StorageError>;

    fn count(&self, reviewed: Option<bool>) -> Result<usize, StorageError>;

    fn stats(&self) -> Result<ReviewStats, StorageError>;

    /// Persist buffered writes. No-op for volatile backends.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Run a repository operation on the blocking pool, bounded by `timeout`.
///
/// On timeout the operation keeps running to completion in the background;
/// only the wait is abandoned.
pub async fn blocking_call<T, F>(
    repository: Arc<dyn UploadRepository>,
    timeout: Duration,
    op: &'static str,
    f: F,
) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&dyn UploadRepository) -> Result<T, StorageError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || f(repository.as_ref()));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(StorageError::Backend(format!("{op}: {join_err}"))),
        Err(_) => Err(StorageError::Timeout(op)),
    }
}
