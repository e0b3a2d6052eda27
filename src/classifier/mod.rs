//! Classifier adapter
//!
//! The inference engine is opaque: given a file path it returns two
//! complementary scores. Everything that invokes it goes through the
//! [`Classifier`] trait so the worker pool never knows which backend runs.
//!
//! - [`CommandClassifier`]: runs an external program per file and parses its
//!   JSON output

mod command;

pub use command::CommandClassifier;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raw classifier output, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    #[serde(alias = "nsfw_percentage")]
    pub nsfw: f32,
    #[serde(alias = "sfw_percentage")]
    pub sfw: f32,
}

impl Scores {
    /// Rescale so both scores sum to 100.
    ///
    /// Engines that emit probabilities (0..1) or slightly drifting sums are
    /// brought onto the percentage scale. A zero sum is rejected.
    pub fn normalized(self) -> Result<Self, ClassifierError> {
        let total = self.nsfw + self.sfw;
        if !total.is_finite() || total <= 0.0 || self.nsfw < 0.0 || self.sfw < 0.0 {
            return Err(ClassifierError::Parse(format!(
                "scores out of range: nsfw={}, sfw={}",
                self.nsfw, self.sfw
            )));
        }

        let nsfw = self.nsfw / total * 100.0;
        Ok(Self {
            nsfw,
            sfw: 100.0 - nsfw,
        })
    }
}

/// Classifier failures. Every variant counts as one failed attempt.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to start classifier: {0}")]
    Spawn(String),
    #[error("classifier exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("unreadable classifier output: {0}")]
    Parse(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Blocking image classifier.
///
/// Calls may take hundreds of milliseconds or more; the worker pool runs
/// them on the blocking thread pool.
pub trait Classifier: Send + Sync + 'static {
    /// Classify the image stored at `path`.
    fn classify(&self, path: &Path) -> Result<Scores, ClassifierError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_probabilities() {
        let s = Scores { nsfw: 0.25, sfw: 0.75 }.normalized().unwrap();
        assert!((s.nsfw - 25.0).abs() < 1e-4);
        assert!((s.nsfw + s.sfw - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_normalize_rejects_zero() {
        assert!(Scores { nsfw: 0.0, sfw: 0.0 }.normalized().is_err());
        assert!(Scores { nsfw: -1.0, sfw: 5.0 }.normalized().is_err());
    }

    #[test]
    fn test_alias_fields() {
        let s: Scores =
            serde_json::from_str(r#"{"nsfw_percentage": 12.5, "sfw_percentage": 87.5}"#).unwrap();
        assert!((s.nsfw - 12.5).abs() < f32::EPSILON);
    }
}
