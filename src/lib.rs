//! safescan: Image Classification Coordinator
//!
//! Accepts image uploads, classifies them through a bounded pool of workers
//! around an external inference engine, and pushes results to live
//! subscribers.
//!
//! ## Architecture
//!
//! - **Fingerprint + Cache**: identical content is classified once per TTL
//! - **Dispatcher**: fixed worker pool over a bounded, drop-on-full queue
//! - **Pipeline**: per-item sequencing of validate, cache, dispatch, persist, notify
//! - **Hub**: single-task actor fanning events out to WebSocket clients
//! - **Review**: relabeling and deletion with acknowledgement events

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod fingerprint;
pub mod hub;
pub mod pipeline;
pub mod prediction;
pub mod review;
pub mod storage;
pub mod validation;

pub use config::AppConfig;
pub use context::AppContext;
pub use fingerprint::Fingerprint;
pub use prediction::{FailureKind, Prediction};

pub use cache::{InMemoryCache, ResultCache};
pub use classifier::{Classifier, ClassifierError, CommandClassifier, Scores};
pub use dispatcher::{DispatchConfig, DispatchError, Job, JobDispatcher, PoolState};
pub use hub::{HubEvent, HubHandle, NotificationHub};
pub use pipeline::{ClassificationPipeline, PipelineConfig, UploadItem};
pub use storage::{
    ClassifiedItem, InMemoryUploadStore, InsertOutcome, SledUploadStore, StorageError,
    UploadRepository,
};
