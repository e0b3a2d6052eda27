//! Shared fixtures for integration tests: scripted classifiers, sample image
//! bytes and a fully wired in-memory application context.

#![allow(dead_code)]

use safescan::classifier::{Classifier, ClassifierError, Scores};
use safescan::hub::NotificationHub;
use safescan::{AppConfig, AppContext, InMemoryUploadStore, UploadRepository};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Smallest header `infer` recognizes as JPEG, plus a tag to vary content.
pub fn jpeg(tag: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, tag]
}

pub fn png(tag: u8) -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, tag]
}

// ============================================================================
// Classifiers
// ============================================================================

/// Always returns the same scores and counts calls.
pub struct FixedClassifier {
    scores: Scores,
    pub calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(nsfw: f32) -> Arc<Self> {
        Arc::new(Self {
            scores: Scores {
                nsfw,
                sfw: 100.0 - nsfw,
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for FixedClassifier {
    fn classify(&self, _path: &Path) -> Result<Scores, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Fails every call.
#[derive(Default)]
pub struct FailingClassifier {
    pub calls: AtomicUsize,
}

impl FailingClassifier {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for FailingClassifier {
    fn classify(&self, _path: &Path) -> Result<Scores, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ClassifierError::Inference("model exploded".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Sleeps before answering; tracks how many calls overlap.
pub struct SlowClassifier {
    delay: Duration,
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl SlowClassifier {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for SlowClassifier {
    fn classify(&self, _path: &Path) -> Result<Scores, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Scores { nsfw: 10.0, sfw: 90.0 })
    }

    fn name(&self) -> &str {
        "slow"
    }
}

// ============================================================================
// Context
// ============================================================================

/// Running context plus the temp directory backing its files.
pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub repository: Arc<InMemoryUploadStore>,
    pub dir: TempDir,
}

/// Config rooted in `dir` with fast timeouts.
pub fn test_config(dir: &Path, workers: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.workers.count = workers;
    config.workers.retry_delay_ms = 10;
    config.workers.job_timeout_ms = 2_000;
    config.files.upload_dir = dir.join("uploads");
    config.files.temp_upload_dir = dir.join("tmp");
    config.storage.db_path = dir.join("db");
    config
}

/// Build and start a context, spawning its hub.
pub fn start_app(classifier: Arc<dyn Classifier>, config: AppConfig, dir: TempDir) -> TestApp {
    let repository = Arc::new(InMemoryUploadStore::new());
    let repo: Arc<dyn UploadRepository> = repository.clone();
    let (ctx, hub) = AppContext::new(config, classifier, repo);
    spawn_hub(hub);
    ctx.start().unwrap();

    TestApp {
        ctx: Arc::new(ctx),
        repository,
        dir,
    }
}

pub fn spawn_hub(hub: NotificationHub) {
    tokio::spawn(hub.run());
}

/// Default app with `workers` workers.
pub fn app_with(classifier: Arc<dyn Classifier>, workers: usize) -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), workers);
    start_app(classifier, config, dir)
}
