//! Job Dispatcher - Bounded Classification Worker Pool
//!
//! Runs a fixed number of workers over a bounded queue so that at most `W`
//! classifier calls execute at once, no matter how many uploads arrive.
//!
//! ## Lifecycle
//!
//! `Uninitialized -> Running -> Draining -> Stopped`
//!
//! - `start()` spawns the workers (idempotent)
//! - `submit()` never blocks: a full queue drops the job, a pool that is not
//!   running rejects it with [`DispatchError::Unavailable`]
//! - `shutdown()` closes submission, lets every queued and in-flight job
//!   finish, then waits for all workers to exit
//!
//! Dropped jobs are not reported to the submitter directly: the job's result
//! slot closes with it, which ends the submitter's wait early.

mod job;
mod worker;

pub use job::{Job, JobTicket, WaitOutcome};

use crate::classifier::Classifier;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// ============================================================================
// State & Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("pool unavailable (state: {0})")]
    Unavailable(PoolState),
}

// ============================================================================
// Configuration
// ============================================================================

/// Pool sizing and retry policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker tasks (`W`)
    pub workers: usize,
    /// Queue capacity, normally `3 * W`
    pub queue_capacity: usize,
    /// Classifier attempts per job, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl DispatchConfig {
    /// Pool with `workers` workers and the default queue factor and retries.
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * crate::config::defaults::QUEUE_FACTOR,
            max_attempts: crate::config::defaults::MAX_RETRIES,
            retry_delay: Duration::from_millis(crate::config::defaults::RETRY_DELAY_MS),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::with_workers(crate::config::defaults::cpu_count())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted: AtomicU64,
    pub dropped: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub discarded: AtomicU64,
}

/// Snapshot of pool activity since construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub state: PoolState,
    pub workers: usize,
    pub queue_capacity: usize,
    pub queue_depth: usize,
    /// Jobs accepted into the queue
    pub submitted: u64,
    /// Jobs dropped because the queue was full
    pub dropped: u64,
    /// Submissions refused because the pool was not running
    pub rejected: u64,
    /// Jobs classified successfully
    pub completed: u64,
    /// Jobs that exhausted their retries
    pub failed: u64,
    /// Results nobody was waiting for anymore
    pub discarded: u64,
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Inner {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

/// Bounded worker pool for classification jobs.
pub struct JobDispatcher {
    classifier: Arc<dyn Classifier>,
    config: DispatchConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<PoolState>,
    counters: Arc<Counters>,
}

impl JobDispatcher {
    pub fn new(classifier: Arc<dyn Classifier>, config: DispatchConfig) -> Self {
        let (state_tx, _) = watch::channel(PoolState::Uninitialized);
        Self {
            classifier,
            config,
            inner: Mutex::new(Inner {
                tx: None,
                workers: Vec::new(),
            }),
            state_tx,
            counters: Arc::new(Counters::default()),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn state(&self) -> PoolState {
        *self.state_tx.borrow()
    }

    /// Spawn the workers. Calling it on a running pool is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut inner = self.lock_inner();

        match self.state() {
            PoolState::Uninitialized => {}
            PoolState::Running => return Ok(()),
            other => return Err(DispatchError::Unavailable(other)),
        }

        let capacity = self.config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let policy = RetryPolicy {
            max_attempts: self.config.max_attempts,
            delay: self.config.retry_delay,
        };

        inner.workers = (0..self.config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(worker::run(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&self.classifier),
                    policy,
                    Arc::clone(&self.counters),
                ))
            })
            .collect();
        inner.tx = Some(tx);
        self.state_tx.send_replace(PoolState::Running);

        info!(
            workers = inner.workers.len(),
            queue_capacity = capacity,
            max_attempts = policy.max_attempts,
            classifier = self.classifier.name(),
            "Job dispatcher started"
        );
        Ok(())
    }

    /// Enqueue a job without blocking.
    ///
    /// A full queue drops the job (the submitter's ticket resolves as
    /// abandoned) and still returns `Ok`.
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let inner = self.lock_inner();
        let state = self.state();

        let tx = match (&inner.tx, state) {
            (Some(tx), PoolState::Running) => tx,
            _ => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = job.id, state = %state, "Job rejected, pool unavailable");
                return Err(DispatchError::Unavailable(state));
            }
        };

        match tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = job.id, capacity = self.config.queue_capacity, "Job queue is full, dropping job");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                error!(job_id = job.id, "Job queue closed while running");
                Err(DispatchError::Unavailable(state))
            }
        }
    }

    /// Drain the queue and stop all workers.
    ///
    /// Returns once every accepted job has produced a result and every worker
    /// has exited. Concurrent and repeated calls wait for the same outcome.
    pub async fn shutdown(&self) {
        let workers = {
            let mut inner = self.lock_inner();
            match self.state() {
                PoolState::Uninitialized => {
                    self.state_tx.send_replace(PoolState::Stopped);
                    info!("Job dispatcher stopped before start");
                    return;
                }
                PoolState::Running => {
                    self.state_tx.send_replace(PoolState::Draining);
                    inner.tx = None;
                    Some(std::mem::take(&mut inner.workers))
                }
                PoolState::Draining | PoolState::Stopped => None,
            }
        };

        let Some(workers) = workers else {
            let mut state_rx = self.state_tx.subscribe();
            // The sender lives in `self`, so this only ends on Stopped.
            let _ = state_rx.wait_for(|s| *s == PoolState::Stopped).await;
            return;
        };

        info!(
            workers = workers.len(),
            queued = self.queue_depth(),
            "Job dispatcher draining"
        );

        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }

        self.state_tx.send_replace(PoolState::Stopped);
        info!("Job dispatcher stopped");
    }

    /// Jobs waiting in the queue (not counting in-flight ones).
    pub fn queue_depth(&self) -> usize {
        let inner = self.lock_inner();
        inner
            .tx
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers.max(1)
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.counters;
        DispatcherStats {
            state: self.state(),
            workers: self.worker_count(),
            queue_capacity: self.config.queue_capacity.max(1),
            queue_depth: self.queue_depth(),
            submitted: c.submitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierError, Scores};
    use std::path::{Path, PathBuf};

    struct Fixed;

    impl Classifier for Fixed {
        fn classify(&self, _path: &Path) -> Result<Scores, ClassifierError> {
            Ok(Scores { nsfw: 20.0, sfw: 80.0 })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn dispatcher(workers: usize) -> JobDispatcher {
        JobDispatcher::new(Arc::new(Fixed), DispatchConfig::with_workers(workers))
    }

    #[test]
    fn test_queue_capacity_defaults() {
        let cfg = DispatchConfig::with_workers(4);
        assert_eq!(cfg.queue_capacity, 12);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.retry_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_submit_before_start_rejected() {
        let d = dispatcher(1);
        let (job, _ticket) = Job::new(0, PathBuf::from("/tmp/a"));
        assert_eq!(
            d.submit(job),
            Err(DispatchError::Unavailable(PoolState::Uninitialized))
        );
        assert_eq!(d.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_roundtrip_and_lifecycle() {
        let d = dispatcher(2);
        d.start().unwrap();
        d.start().unwrap();
        assert_eq!(d.state(), PoolState::Running);

        let (job, ticket) = Job::new(4, PathBuf::from("/tmp/a"));
        d.submit(job).unwrap();
        match ticket.wait(Duration::from_secs(2)).await {
            WaitOutcome::Completed(p) => {
                assert!(p.success);
                assert_eq!(p.id, 4);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        d.shutdown().await;
        assert_eq!(d.state(), PoolState::Stopped);
        d.shutdown().await;
        assert_eq!(d.start(), Err(DispatchError::Unavailable(PoolState::Stopped)));

        let stats = d.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_shutdown_uninitialized() {
        let d = dispatcher(1);
        d.shutdown().await;
        assert_eq!(d.state(), PoolState::Stopped);
    }
}
