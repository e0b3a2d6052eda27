//! Per-item orchestration of fingerprinting, caching, dispatch, persistence
//! and notification.

use crate::cache::ResultCache;
use crate::dispatcher::{Job, JobDispatcher, WaitOutcome};
use crate::fingerprint::Fingerprint;
use crate::hub::{HubEvent, HubHandle};
use crate::prediction::{FailureKind, Prediction, TIMEOUT_MESSAGE};
use crate::storage::{self, InsertOutcome, NewClassifiedItem, UploadRepository};
use crate::validation::{ContentValidator, DetectedType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// One uploaded file as received from the client, with its fingerprint.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub filename: String,
    bytes: Vec<u8>,
    fingerprint: Fingerprint,
}

impl UploadItem {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let fingerprint = Fingerprint::of(&bytes);
        Self {
            filename: filename.into(),
            bytes,
            fingerprint,
        }
    }

    /// Item whose bytes were hashed while they were received.
    pub(crate) fn prehashed(filename: String, bytes: Vec<u8>, fingerprint: Fingerprint) -> Self {
        Self {
            filename,
            bytes,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Timeouts and file locations used by the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a caller waits for a classification result
    pub job_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub storage_timeout: Duration,
    /// Staging directory for files awaiting classification
    pub temp_dir: PathBuf,
    /// Final home of classified files
    pub upload_dir: PathBuf,
    /// URL prefix under which `upload_dir` is served
    pub public_prefix: String,
    /// Sniffed MIME types accepted for classification
    pub allowed_mime_types: Vec<String>,
}

/// Coordinates a batch of uploads through the classification stages.
pub struct ClassificationPipeline {
    dispatcher: Arc<JobDispatcher>,
    cache: Arc<dyn ResultCache>,
    repository: Arc<dyn UploadRepository>,
    validator: ContentValidator,
    hub: HubHandle,
    background: TaskTracker,
    config: PipelineConfig,
}

impl ClassificationPipeline {
    pub fn new(
        dispatcher: Arc<JobDispatcher>,
        cache: Arc<dyn ResultCache>,
        repository: Arc<dyn UploadRepository>,
        hub: HubHandle,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dispatcher,
            cache,
            repository,
            validator: ContentValidator::new(config.allowed_mime_types.clone()),
            hub,
            background: TaskTracker::new(),
            config,
        }
    }

    /// File moves and cleanups still running in the background.
    pub fn background_tasks(&self) -> &TaskTracker {
        &self.background
    }

    /// Classify every item, returning one prediction per item in input order.
    pub async fn process_batch(&self, items: Vec<UploadItem>) -> Vec<Prediction> {
        let batch_started = Instant::now();
        let total = items.len();
        let mut predictions = Vec::with_capacity(total);

        for (id, item) in items.into_iter().enumerate() {
            predictions.push(self.process_item(id, item).await);
        }

        let failed = predictions.iter().filter(|p| !p.success).count();
        info!(
            items = total,
            failed,
            elapsed_ms = batch_started.elapsed().as_millis() as u64,
            "Batch processed"
        );
        predictions
    }

    /// Run a single item through all stages. Never fails; errors become a
    /// failed prediction.
    pub async fn process_item(&self, id: usize, item: UploadItem) -> Prediction {
        let started = Instant::now();
        let fingerprint = item.fingerprint.clone();
        let fail = |kind: FailureKind, msg: String| {
            Prediction::failure(id, kind, format!("{}: {}", item.filename, msg))
                .with_sha256(fingerprint.as_str())
        };

        let detected = match self.validator.validate(&item.bytes) {
            Ok(t) => t,
            Err(e) => {
                debug!(item = id, file = %item.filename, error = %e, "Upload rejected");
                return fail(FailureKind::Validation, e.to_string());
            }
        };

        if let Some(hit) = self.cache_lookup(&fingerprint).await {
            debug!(item = id, hash = %fingerprint, "Cache hit");
            return hit.stamped(id, started).with_sha256(fingerprint.as_str());
        }

        let temp_path = match self.stage_temp_file(&item.bytes, &detected).await {
            Ok(p) => p,
            Err(e) => {
                warn!(item = id, error = %e, "Failed to stage upload");
                return fail(FailureKind::Io, format!("failed to stage upload: {e}"));
            }
        };

        let (job, ticket) = Job::new(id, temp_path.clone());
        if let Err(e) = self.dispatcher.submit(job) {
            self.discard(temp_path);
            return fail(FailureKind::PoolUnavailable, e.to_string());
        }

        let wait_started = Instant::now();
        let prediction = match ticket.wait(self.config.job_timeout).await {
            WaitOutcome::Completed(p) => p,
            WaitOutcome::TimedOut => {
                // The worker still owns the temp file and removes it when done.
                warn!(item = id, hash = %fingerprint, timeout_ms = self.config.job_timeout.as_millis() as u64, "Timed out waiting for classification");
                return fail(FailureKind::Timeout, TIMEOUT_MESSAGE.to_string());
            }
            WaitOutcome::Abandoned => {
                // Dropped under load. Callers only ever learn of it as a timeout.
                warn!(item = id, hash = %fingerprint, "Job dropped before completion");
                self.discard(temp_path);
                let remaining = self.config.job_timeout.saturating_sub(wait_started.elapsed());
                tokio::time::sleep(remaining).await;
                return fail(FailureKind::Timeout, TIMEOUT_MESSAGE.to_string());
            }
        };

        if !prediction.success {
            self.discard(temp_path);
            let msg = prediction.error.clone().unwrap_or_default();
            return fail(FailureKind::Worker, msg);
        }

        let prediction = prediction.stamped(id, started).with_sha256(fingerprint.as_str());
        self.cache_store(&fingerprint, &prediction).await;

        let file_name = format!("{}{}", fingerprint, detected.dotted_extension());
        let public_path = format!(
            "{}/{}",
            self.config.public_prefix.trim_end_matches('/'),
            file_name
        );
        let record = NewClassifiedItem::from_prediction(&prediction, fingerprint.clone(), public_path);
        let outcome = self.persist(record).await;

        self.relocate(temp_path, self.config.upload_dir.join(&file_name));

        if let Some(InsertOutcome::Inserted(item)) = outcome {
            self.hub.publish(&HubEvent::NewUpload { data: item }).await;
        }

        prediction
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    async fn cache_lookup(&self, fingerprint: &Fingerprint) -> Option<Prediction> {
        match tokio::time::timeout(self.config.cache_timeout, self.cache.get(fingerprint)).await {
            Ok(Ok(hit)) => hit.filter(|p| p.success),
            Ok(Err(e)) => {
                warn!(hash = %fingerprint, backend = self.cache.backend_name(), error = %e, "Cache lookup failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(hash = %fingerprint, backend = self.cache.backend_name(), "Cache lookup timed out, treating as miss");
                None
            }
        }
    }

    async fn cache_store(&self, fingerprint: &Fingerprint, prediction: &Prediction) {
        let put = self.cache.put(fingerprint, prediction, self.config.cache_ttl);
        match tokio::time::timeout(self.config.cache_timeout, put).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(hash = %fingerprint, error = %e, "Cache store failed"),
            Err(_) => warn!(hash = %fingerprint, "Cache store timed out"),
        }
    }

    async fn stage_temp_file(&self, bytes: &[u8], detected: &DetectedType) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let path = self.config.temp_dir.join(format!(
            "upload-{}{}",
            uuid::Uuid::new_v4(),
            detected.dotted_extension()
        ));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Insert the durable record. Storage problems are logged and reported as
    /// `None`; they never fail the prediction.
    async fn persist(&self, record: NewClassifiedItem) -> Option<InsertOutcome> {
        let hash = record.file_hash.clone();
        let result = storage::blocking_call(
            Arc::clone(&self.repository),
            self.config.storage_timeout,
            "insert_classified_item",
            move |repo| repo.insert_classified_item(record),
        )
        .await;

        match result {
            Ok(InsertOutcome::Duplicate) => {
                debug!(hash = %hash, "Record already stored");
                Some(InsertOutcome::Duplicate)
            }
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(hash = %hash, backend = self.repository.backend_name(), error = %e, "Failed to persist classified item");
                None
            }
        }
    }

    /// Move the staged file to its final location in the background.
    fn relocate(&self, from: PathBuf, to: PathBuf) {
        self.background.spawn(async move {
            if let Err(e) = move_file(&from, &to).await {
                warn!(from = %from.display(), to = %to.display(), error = %e, "Failed to relocate upload");
                let _ = tokio::fs::remove_file(&from).await;
            }
        });
    }

    /// Remove a staged file in the background.
    fn discard(&self, path: PathBuf) {
        self.background.spawn(async move {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "Temp file cleanup skipped");
            }
        });
    }
}

/// Rename, falling back to copy and remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}
