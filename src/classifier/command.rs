//! External-process classifier backend.
//!
//! Runs `<program> <args...> <image-path>` once per image. The last non-empty
//! line of stdout must be a JSON object with `nsfw` and `sfw` scores (the
//! `*_percentage` spellings are accepted too).

use super::{Classifier, ClassifierError, Scores};
use std::path::Path;
use std::process::{Command, Stdio};

/// Classifier that shells out to an inference program.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn parse_output(stdout: &str) -> Result<Scores, ClassifierError> {
        let line = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| ClassifierError::Parse("empty output".to_string()))?;

        let scores: Scores =
            serde_json::from_str(line).map_err(|e| ClassifierError::Parse(e.to_string()))?;
        scores.normalized()
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, path: &Path) -> Result<Scores, ClassifierError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ClassifierError::Spawn(format!("'{}': {}", self.program, e)))?;

        if !output.status.success() {
            return Err(ClassifierError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let scores = Self::parse_output(&stdout)?;

        tracing::trace!(
            path = %path.display(),
            nsfw = scores.nsfw,
            sfw = scores.sfw,
            "Classifier output parsed"
        );

        Ok(scores)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_line() {
        let out = "loading model...\n\n{\"nsfw\": 80, \"sfw\": 20}\n";
        let s = CommandClassifier::parse_output(out).unwrap();
        assert!((s.nsfw - 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            CommandClassifier::parse_output("not json"),
            Err(ClassifierError::Parse(_))
        ));
        assert!(CommandClassifier::parse_output("   \n").is_err());
    }

    #[test]
    fn test_missing_program() {
        let c = CommandClassifier::new("/nonexistent/classifier-binary", Vec::new());
        let err = c.classify(Path::new("/tmp/x.jpg")).unwrap_err();
        assert!(matches!(err, ClassifierError::Spawn(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_shell_program() {
        let c = CommandClassifier::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo '{\"nsfw\": 0.1, \"sfw\": 0.9}'".to_string(),
                "classifier".to_string(),
            ],
        );
        let s = c.classify(Path::new("/tmp/whatever.png")).unwrap();
        assert!((s.sfw - 90.0).abs() < 1e-3);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit() {
        let c = CommandClassifier::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string(), "classifier".to_string()],
        );
        match c.classify(Path::new("/tmp/whatever.png")) {
            Err(ClassifierError::Exit { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
