//! Review service: human relabeling and deletion of classified items.
//!
//! Each action announces itself with an `in_progress` event and, once the
//! store confirms the change, an ack event. An action that touches no record
//! ends with [`ReviewError::NotFound`] and no ack.

use crate::fingerprint::Fingerprint;
use crate::hub::{HubEvent, HubHandle};
use crate::storage::{self, ClassifiedItem, Label, ReviewStats, StorageError, UploadRepository};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Accepted `event` values for label requests.
const LABEL_EVENTS: &[&str] = &["rate", "update_rate"];
const DELETE_EVENT: &str = "delete";

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("invalid event '{0}'")]
    InvalidEvent(String),
    #[error("invalid rating '{0}', expected NSFW or SFW")]
    InvalidRating(String),
    #[error("sha256 in body does not match the path")]
    HashMismatch,
    #[error("malformed sha256")]
    InvalidHash,
    #[error("no record for {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to remove stored file: {0}")]
    FileRemoval(#[source] std::io::Error),
}

/// Body of a label request.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelRequest {
    pub event: String,
    pub sha256: String,
    #[serde(default)]
    pub rating: String,
}

/// Body of a delete request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub event: String,
    pub sha256: String,
}

/// One page of records.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub data: Vec<ClassifiedItem>,
    /// Items in this page
    pub count: usize,
    /// Items matching the filter overall
    pub total: usize,
}

pub struct ReviewService {
    repository: Arc<dyn UploadRepository>,
    hub: HubHandle,
    storage_timeout: Duration,
    upload_dir: PathBuf,
}

impl ReviewService {
    pub fn new(
        repository: Arc<dyn UploadRepository>,
        hub: HubHandle,
        storage_timeout: Duration,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            repository,
            hub,
            storage_timeout,
            upload_dir,
        }
    }

    /// Apply a review label to the item addressed by `path_hash`.
    pub async fn label(&self, path_hash: &str, request: LabelRequest) -> Result<HubEvent, ReviewError> {
        if !LABEL_EVENTS.contains(&request.event.as_str()) {
            return Err(ReviewError::InvalidEvent(request.event));
        }
        let label: Label = request
            .rating
            .parse()
            .map_err(|_| ReviewError::InvalidRating(request.rating.clone()))?;
        let fingerprint = Self::check_hash(path_hash, &request.sha256)?;

        self.hub.publish(&HubEvent::in_progress(fingerprint.as_str())).await;

        let fp = fingerprint.clone();
        let rows = self
            .call("update_label", move |repo| repo.update_label(&fp, label))
            .await?;
        if rows == 0 {
            return Err(ReviewError::NotFound(fingerprint.to_string()));
        }

        info!(hash = %fingerprint, label = %label, "Item relabeled");
        let ack = HubEvent::ack_rating(fingerprint.as_str());
        self.hub.publish(&ack).await;
        Ok(ack)
    }

    /// Delete the stored file and record for `path_hash`.
    pub async fn delete(&self, path_hash: &str, request: DeleteRequest) -> Result<HubEvent, ReviewError> {
        if request.event != DELETE_EVENT {
            return Err(ReviewError::InvalidEvent(request.event));
        }
        let fingerprint = Self::check_hash(path_hash, &request.sha256)?;

        self.hub.publish(&HubEvent::in_progress(fingerprint.as_str())).await;

        let fp = fingerprint.clone();
        let public_path = self
            .call("find_path_by_fingerprint", move |repo| repo.find_path_by_fingerprint(&fp))
            .await?
            .ok_or_else(|| ReviewError::NotFound(fingerprint.to_string()))?;

        let file = self.local_file(&public_path);
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %file.display(), "Stored file already missing");
            }
            Err(e) => return Err(ReviewError::FileRemoval(e)),
        }

        let fp = fingerprint.clone();
        let rows = self
            .call("delete_by_fingerprint", move |repo| repo.delete_by_fingerprint(&fp))
            .await?;
        if rows == 0 {
            return Err(ReviewError::NotFound(fingerprint.to_string()));
        }

        info!(hash = %fingerprint, "Item deleted");
        let ack = HubEvent::ack_delete(fingerprint.as_str());
        self.hub.publish(&ack).await;
        Ok(ack)
    }

    /// Records with `id > cursor`, newest first.
    pub async fn page(&self, cursor: u64, limit: usize, reviewed: Option<bool>) -> Result<Page, ReviewError> {
        let data = self
            .call("list_page", move |repo| repo.list_page(cursor, limit, reviewed))
            .await?;
        let total = self.call("count", move |repo| repo.count(reviewed)).await?;

        Ok(Page {
            count: data.len(),
            data,
            total,
        })
    }

    pub async fn stats(&self) -> Result<ReviewStats, ReviewError> {
        Ok(self.call("stats", |repo| repo.stats()).await?)
    }

    fn check_hash(path_hash: &str, body_hash: &str) -> Result<Fingerprint, ReviewError> {
        if path_hash != body_hash {
            return Err(ReviewError::HashMismatch);
        }
        Fingerprint::parse(path_hash).ok_or(ReviewError::InvalidHash)
    }

    /// Map a stored public path onto `upload_dir`. Only the file name is
    /// used, so a record can never point outside the upload directory.
    fn local_file(&self, public_path: &str) -> PathBuf {
        let name = Path::new(public_path)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        self.upload_dir.join(name)
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UploadRepository) -> Result<T, StorageError> + Send + 'static,
    {
        storage::blocking_call(Arc::clone(&self.repository), self.storage_timeout, op, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{HubConfig, NotificationHub};
    use crate::storage::{InMemoryUploadStore, InsertOutcome, NewClassifiedItem};
    use tempfile::TempDir;

    struct Fixture {
        service: ReviewService,
        repo: Arc<InMemoryUploadStore>,
        hub: HubHandle,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let (actor, hub) = NotificationHub::new(&HubConfig::default());
        tokio::spawn(actor.run());
        let repo = Arc::new(InMemoryUploadStore::new());
        let dir = TempDir::new().unwrap();
        let service = ReviewService::new(
            repo.clone(),
            hub.clone(),
            Duration::from_secs(3),
            dir.path().to_path_buf(),
        );
        Fixture { service, repo, hub, dir }
    }

    fn store(repo: &InMemoryUploadStore, content: &[u8]) -> Fingerprint {
        let fp = Fingerprint::of(content);
        let outcome = repo
            .insert_classified_item(NewClassifiedItem {
                file_path: format!("/static/uploads/{fp}.jpg"),
                file_hash: fp.clone(),
                label: Label::Sfw,
                confidence: 90.0,
            })
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
        fp
    }

    fn label_req(event: &str, fp: &str, rating: &str) -> LabelRequest {
        LabelRequest {
            event: event.to_string(),
            sha256: fp.to_string(),
            rating: rating.to_string(),
        }
    }

    #[tokio::test]
    async fn test_label_acks_and_broadcasts() {
        let f = fixture();
        let fp = store(&f.repo, b"img");
        let mut sub = f.hub.register().await.unwrap();

        let ack = f.service.label(fp.as_str(), label_req("rate", fp.as_str(), "NSFW")).await.unwrap();
        assert_eq!(ack, HubEvent::ack_rating(fp.as_str()));

        let first: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "in_progress");
        let second: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(second["event"], "ack_rating");
        assert_eq!(f.repo.count(Some(true)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_label_unknown_is_not_found_without_ack() {
        let f = fixture();
        let fp = Fingerprint::of(b"never stored");
        let mut sub = f.hub.register().await.unwrap();

        let err = f
            .service
            .label(fp.as_str(), label_req("update_rate", fp.as_str(), "SFW"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotFound(_)));

        let only: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(only["event"], "in_progress");
        // Round-trip through the actor so any ack would already be queued.
        f.hub.client_count().await.unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_label_validation() {
        let f = fixture();
        let fp = Fingerprint::of(b"x");
        let h = fp.as_str();

        assert!(matches!(
            f.service.label(h, label_req("like", h, "SFW")).await,
            Err(ReviewError::InvalidEvent(_))
        ));
        assert!(matches!(
            f.service.label(h, label_req("rate", h, "maybe")).await,
            Err(ReviewError::InvalidRating(_))
        ));
        let other = Fingerprint::of(b"y");
        assert!(matches!(
            f.service.label(h, label_req("rate", other.as_str(), "SFW")).await,
            Err(ReviewError::HashMismatch)
        ));
        assert!(matches!(
            f.service.label("abc", label_req("rate", "abc", "SFW")).await,
            Err(ReviewError::InvalidHash)
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_record() {
        let f = fixture();
        let fp = store(&f.repo, b"bye");
        let file = f.dir.path().join(format!("{fp}.jpg"));
        std::fs::write(&file, b"bye").unwrap();

        let req = DeleteRequest {
            event: "delete".to_string(),
            sha256: fp.to_string(),
        };
        let ack = f.service.delete(fp.as_str(), req.clone()).await.unwrap();
        assert_eq!(ack, HubEvent::ack_delete(fp.as_str()));
        assert!(!file.exists());
        assert_eq!(f.repo.count(None).unwrap(), 0);

        assert!(matches!(
            f.service.delete(fp.as_str(), req).await,
            Err(ReviewError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_file() {
        let f = fixture();
        let fp = store(&f.repo, b"no file on disk");
        let req = DeleteRequest {
            event: "delete".to_string(),
            sha256: fp.to_string(),
        };
        assert!(f.service.delete(fp.as_str(), req).await.is_ok());
    }

    #[tokio::test]
    async fn test_page() {
        let f = fixture();
        for i in 0..3u8 {
            store(&f.repo, &[i]);
        }
        let page = f.service.page(0, 2, None).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.total, 3);
        assert!(page.data[0].id > page.data[1].id);
    }
}
