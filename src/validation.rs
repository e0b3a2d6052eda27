//! Upload content validation.
//!
//! The content type is sniffed from magic bytes, never taken from the client's
//! filename or multipart headers. The sniffed extension is also what the
//! stored file ends up being named with.

/// Image types accepted for classification.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/jp2",
    "image/vnd.ms-photo",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("empty file")]
    Empty,
    #[error("unrecognized file type")]
    Unrecognized,
    #[error("unsupported file type: {0}")]
    Unsupported(String),
}

/// Result of a successful sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedType {
    pub mime: &'static str,
    pub extension: &'static str,
}

impl DetectedType {
    /// Extension with its leading dot, ready to append to a file stem.
    pub fn dotted_extension(&self) -> String {
        format!(".{}", self.extension)
    }
}

/// Built-in allow-list as owned strings, the form config carries it in.
pub fn default_allowed_types() -> Vec<String> {
    ALLOWED_MIME_TYPES.iter().map(|m| (*m).to_string()).collect()
}

/// MIME allow-list checker.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    allowed: Vec<String>,
}

impl ContentValidator {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn validate(&self, bytes: &[u8]) -> Result<DetectedType, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::Empty);
        }

        let kind = infer::get(bytes).ok_or(ValidationError::Unrecognized)?;
        let mime = kind.mime_type();

        if !self.allowed.iter().any(|a| a == mime) {
            return Err(ValidationError::Unsupported(mime.to_string()));
        }

        Ok(DetectedType {
            mime,
            extension: kind.extension(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[test]
    fn test_minimal_jpeg_accepted() {
        let t = ContentValidator::new(default_allowed_types())
            .validate(&[0xFF, 0xD8, 0xFF, 0xE0])
            .unwrap();
        assert_eq!(t.mime, "image/jpeg");
        assert_eq!(t.dotted_extension(), ".jpg");
    }

    #[test]
    fn test_png_accepted() {
        let t = ContentValidator::new(default_allowed_types()).validate(PNG_HEADER).unwrap();
        assert_eq!(t.mime, "image/png");
    }

    #[test]
    fn test_rejections() {
        let v = ContentValidator::new(default_allowed_types());
        assert_eq!(v.validate(&[]), Err(ValidationError::Empty));
        assert_eq!(v.validate(b"plain text"), Err(ValidationError::Unrecognized));
        // PDF magic
        assert!(matches!(
            v.validate(b"%PDF-1.7\n"),
            Err(ValidationError::Unsupported(m)) if m == "application/pdf"
        ));
    }

    #[test]
    fn test_custom_allow_list() {
        let v = ContentValidator::new(vec!["image/png".to_string()]);
        assert!(v.validate(PNG_HEADER).is_ok());
        assert!(v.validate(&[0xFF, 0xD8, 0xFF, 0xE0]).is_err());
    }
}
