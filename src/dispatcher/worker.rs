//! Worker loop: pull a job, classify with retries, deliver the result.
//!
//! When the submitter has stopped waiting, the worker owns the job's temp
//! file and removes it.

use super::{Counters, Job, RetryPolicy};
use crate::classifier::{Classifier, Scores};
use crate::prediction::{FailureKind, Prediction};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub(super) type SharedQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Process jobs until the queue is closed and drained.
pub(super) async fn run(
    worker_id: usize,
    queue: SharedQueue,
    classifier: Arc<dyn Classifier>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
) {
    debug!(worker_id, "Worker started");

    loop {
        // Hold the lock only while waiting for the next job.
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let started = Instant::now();
        let prediction = match classify_with_retries(&classifier, &job.path, policy, worker_id, job.id).await {
            Ok(scores) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                Prediction::from_scores(job.id, scores, started)
            }
            Err(message) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                Prediction::failure(job.id, FailureKind::Worker, message)
            }
        };

        let job_id = job.id;
        let path = job.path.clone();
        if job.complete(prediction).is_err() {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            warn!(worker_id, job_id, "Submitter stopped waiting, result discarded");
            // Nobody will relocate the image now.
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(worker_id, job_id, path = %path.display(), error = %e, "Temp file already gone");
            }
        }
    }

    info!(worker_id, "Worker exiting");
}

async fn classify_with_retries(
    classifier: &Arc<dyn Classifier>,
    path: &Path,
    policy: RetryPolicy,
    worker_id: usize,
    job_id: usize,
) -> Result<Scores, String> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let engine = Arc::clone(classifier);
        let image = path.to_path_buf();

        match tokio::task::spawn_blocking(move || engine.classify(&image)).await {
            Ok(Ok(scores)) => return Ok(scores),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(join_err) => last_error = format!("classifier task failed: {join_err}"),
        }

        warn!(
            worker_id,
            job_id,
            attempt,
            max_attempts = attempts,
            error = %last_error,
            "Classification attempt failed"
        );

        if attempt < attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(format!("classification failed after {attempts} attempts: {last_error}"))
}
