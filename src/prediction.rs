//! Classification result returned for every uploaded item.

use crate::classifier::Scores;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Error text reported when the caller stops waiting for a job.
pub const TIMEOUT_MESSAGE: &str = "Timeout processing file";

/// Which stage produced a failed prediction. Serialized into `trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upload rejected before any work was scheduled
    Validation,
    /// Classifier kept failing after all retry attempts
    Worker,
    /// Caller gave up waiting (the job itself keeps running)
    Timeout,
    /// Worker pool is draining or stopped
    PoolUnavailable,
    /// Local file handling failed
    Io,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Worker => "worker",
            Self::Timeout => "timeout",
            Self::PoolUnavailable => "pool_unavailable",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one uploaded item.
///
/// `nsfw_percentage` and `sfw_percentage` are complementary and sum to 100
/// on success. Failed predictions carry zero scores, an `error` message and a
/// `trace` naming the failing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Index of the item within its batch
    pub id: usize,
    pub nsfw_percentage: f32,
    pub sfw_percentage: f32,
    /// Wall time spent on the item, in seconds
    pub duration: f64,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub uuid: String,
    /// Content fingerprint (empty if hashing never happened)
    #[serde(default)]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub success: bool,
}

impl Prediction {
    /// Successful prediction built from classifier scores.
    pub fn from_scores(id: usize, scores: Scores, started: Instant) -> Self {
        Self {
            id,
            nsfw_percentage: scores.nsfw,
            sfw_percentage: scores.sfw,
            duration: started.elapsed().as_secs_f64(),
            timestamp: Utc::now().timestamp(),
            uuid: uuid::Uuid::new_v4().to_string(),
            sha256: String::new(),
            error: None,
            trace: None,
            success: true,
        }
    }

    /// Failed prediction tagged with the stage that produced it.
    pub fn failure(id: usize, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            id,
            nsfw_percentage: 0.0,
            sfw_percentage: 0.0,
            duration: 0.0,
            timestamp: Utc::now().timestamp(),
            uuid: uuid::Uuid::new_v4().to_string(),
            sha256: String::new(),
            error: Some(message.into()),
            trace: Some(kind.as_str().to_string()),
            success: false,
        }
    }

    /// Re-address the prediction to `id` and refresh timestamp and duration.
    ///
    /// Used both when a worker result is handed back and when a cached result
    /// is served for a new upload.
    #[must_use]
    pub fn stamped(mut self, id: usize, started: Instant) -> Self {
        self.id = id;
        self.timestamp = Utc::now().timestamp();
        self.duration = started.elapsed().as_secs_f64();
        self
    }

    #[must_use]
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = sha256.into();
        self
    }

    /// Failure stage, if this prediction failed.
    pub fn failure_kind(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        !self.success && self.trace.as_deref() == Some(FailureKind::Timeout.as_str())
    }

    /// True when the NSFW score dominates.
    pub fn is_nsfw(&self) -> bool {
        self.nsfw_percentage > self.sfw_percentage
    }

    /// Score of the dominant class.
    pub fn confidence(&self) -> f32 {
        self.nsfw_percentage.max(self.sfw_percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_shape() {
        let p = Prediction::failure(3, FailureKind::Timeout, TIMEOUT_MESSAGE);
        assert_eq!(p.id, 3);
        assert!(!p.success);
        assert!(p.is_timeout());
        assert_eq!(p.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(p.failure_kind(), Some("timeout"));
    }

    #[test]
    fn test_success_json_omits_error_fields() {
        let p = Prediction::from_scores(0, Scores { nsfw: 10.0, sfw: 90.0 }, Instant::now());
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("trace").is_none());
        assert_eq!(v["success"], true);
        assert_eq!(v["sfw_percentage"], 90.0);
    }

    #[test]
    fn test_stamped_rewrites_id() {
        let p = Prediction::from_scores(0, Scores { nsfw: 70.0, sfw: 30.0 }, Instant::now())
            .stamped(5, Instant::now());
        assert_eq!(p.id, 5);
        assert!(p.is_nsfw());
        assert!((p.confidence() - 70.0).abs() < f32::EPSILON);
    }
}
