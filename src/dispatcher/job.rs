//! Unit of classification work and its single-use result slot.

use crate::prediction::Prediction;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

/// One image waiting to be classified.
///
/// Consumed exactly once by a worker. If the job is dropped without being
/// completed (for instance because the queue was full), the waiting
/// [`JobTicket`] resolves to [`WaitOutcome::Abandoned`] right away.
#[derive(Debug)]
pub struct Job {
    /// Item index within its batch; unique per batch only
    pub id: usize,
    /// Temp file holding the image bytes
    pub path: PathBuf,
    result_tx: oneshot::Sender<Prediction>,
}

impl Job {
    pub fn new(id: usize, path: PathBuf) -> (Self, JobTicket) {
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self { id, path, result_tx },
            JobTicket { result_rx },
        )
    }

    /// Deliver the result without blocking.
    ///
    /// Returns the prediction back if the submitter already stopped waiting.
    pub fn complete(self, prediction: Prediction) -> Result<(), Prediction> {
        self.result_tx.send(prediction)
    }

    /// `true` once the submitter dropped its ticket.
    pub fn is_abandoned(&self) -> bool {
        self.result_tx.is_closed()
    }
}

/// How waiting on a job ended.
#[derive(Debug)]
pub enum WaitOutcome {
    Completed(Prediction),
    /// Deadline passed first; the job keeps running
    TimedOut,
    /// Job was dropped without a result
    Abandoned,
}

/// Submitter side of a job's result slot.
#[derive(Debug)]
pub struct JobTicket {
    result_rx: oneshot::Receiver<Prediction>,
}

impl JobTicket {
    /// Wait for the result for at most `timeout`.
    ///
    /// On timeout the slot is closed before giving up, so a worker finishing
    /// at the same instant either lands its result here or sees its delivery
    /// fail. It never succeeds into a slot nobody reads.
    pub async fn wait(self, timeout: Duration) -> WaitOutcome {
        let mut rx = self.result_rx;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(prediction)) => WaitOutcome::Completed(prediction),
            Ok(Err(_)) => WaitOutcome::Abandoned,
            Err(_) => {
                rx.close();
                match rx.try_recv() {
                    Ok(prediction) => WaitOutcome::Completed(prediction),
                    Err(_) => WaitOutcome::TimedOut,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::FailureKind;

    #[tokio::test]
    async fn test_completed() {
        let (job, ticket) = Job::new(2, PathBuf::from("/tmp/x"));
        job.complete(Prediction::failure(2, FailureKind::Worker, "x")).unwrap();
        assert!(matches!(
            ticket.wait(Duration::from_secs(1)).await,
            WaitOutcome::Completed(p) if p.id == 2
        ));
    }

    #[tokio::test]
    async fn test_dropped_job_abandons_ticket() {
        let (job, ticket) = Job::new(0, PathBuf::from("/tmp/x"));
        drop(job);
        assert!(matches!(ticket.wait(Duration::from_secs(5)).await, WaitOutcome::Abandoned));
    }

    #[tokio::test]
    async fn test_late_completion_is_returned() {
        let (job, ticket) = Job::new(0, PathBuf::from("/tmp/x"));
        assert!(matches!(ticket.wait(Duration::from_millis(10)).await, WaitOutcome::TimedOut));
        assert!(job.is_abandoned());
        assert!(job.complete(Prediction::failure(0, FailureKind::Worker, "late")).is_err());
    }
}
