//! Application context
//!
//! Owns every long-lived component and wires them together once at startup.
//! Handlers and background tasks receive it as `Arc<AppContext>`; there is no
//! process-wide state anywhere else.
//!
//! ## Shutdown order
//!
//! 1. Drain the dispatcher (every accepted job finishes)
//! 2. Close and wait on tracked file tasks (relocation, cleanup)
//! 3. Flush storage

use crate::cache::InMemoryCache;
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::dispatcher::{DispatchConfig, DispatchError, JobDispatcher};
use crate::hub::{HubConfig, HubHandle, NotificationHub};
use crate::pipeline::{ClassificationPipeline, PipelineConfig};
use crate::review::ReviewService;
use crate::storage::UploadRepository;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AppContext {
    pub config: AppConfig,
    pub dispatcher: Arc<JobDispatcher>,
    pub cache: Arc<InMemoryCache>,
    pub repository: Arc<dyn UploadRepository>,
    pub hub: HubHandle,
    pub pipeline: ClassificationPipeline,
    pub review: ReviewService,
}

impl AppContext {
    /// Build all components. The returned hub actor must be spawned by the
    /// caller; nothing is started yet.
    pub fn new(
        config: AppConfig,
        classifier: Arc<dyn Classifier>,
        repository: Arc<dyn UploadRepository>,
    ) -> (Self, NotificationHub) {
        let workers = config.workers.effective_count();
        let dispatcher = Arc::new(JobDispatcher::new(
            classifier,
            DispatchConfig {
                workers,
                queue_capacity: workers.saturating_mul(config.workers.queue_factor),
                max_attempts: config.workers.max_retries,
                retry_delay: config.retry_delay(),
            },
        ));

        let (hub_actor, hub) = NotificationHub::new(&HubConfig {
            client_buffer: config.hub.client_buffer,
            command_buffer: config.hub.command_buffer,
        });

        let cache = Arc::new(InMemoryCache::new());

        let pipeline = ClassificationPipeline::new(
            Arc::clone(&dispatcher),
            cache.clone(),
            Arc::clone(&repository),
            hub.clone(),
            PipelineConfig {
                job_timeout: config.job_timeout(),
                cache_ttl: config.cache_ttl(),
                cache_timeout: config.cache_timeout(),
                storage_timeout: config.storage_timeout(),
                temp_dir: config.files.temp_upload_dir.clone(),
                upload_dir: config.files.upload_dir.clone(),
                public_prefix: config.files.public_prefix.clone(),
                allowed_mime_types: config.files.allowed_mime_types.clone(),
            },
        );

        let review = ReviewService::new(
            Arc::clone(&repository),
            hub.clone(),
            config.storage_timeout(),
            config.files.upload_dir.clone(),
        );

        let ctx = Self {
            config,
            dispatcher,
            cache,
            repository,
            hub,
            pipeline,
            review,
        };

        (ctx, hub_actor)
    }

    /// Start the worker pool.
    pub fn start(&self) -> Result<(), DispatchError> {
        self.dispatcher.start()?;
        info!(
            workers = self.dispatcher.worker_count(),
            storage = self.repository.backend_name(),
            "Application context started"
        );
        Ok(())
    }

    /// Drain work and release resources. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;

        let background = self.pipeline.background_tasks();
        background.close();
        info!(pending = background.len(), "Waiting for background file tasks");
        background.wait().await;

        let repository = Arc::clone(&self.repository);
        match tokio::task::spawn_blocking(move || repository.flush()).await {
            Ok(Ok(())) => info!("Storage flushed"),
            Ok(Err(e)) => warn!(error = %e, "Storage flush failed"),
            Err(e) => warn!(error = %e, "Storage flush task failed"),
        }
    }
}
