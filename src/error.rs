//! Error types surfaced by the conversion engine.
//!
//! Every failure inside a single conversion is folded into a
//! [`ConversionError`], so callers always get a value back instead of an
//! escaping fault.

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Classification of a failed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    /// The source could not be read or decoded as an image
    UnrecognizedImage,
    /// Anything after decoding: bad parameters, directory creation, encoding, writing
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnrecognizedImage => write!(f, "unrecognized image"),
            ErrorKind::Other => write!(f, "conversion failed"),
        }
    }
}

/// Failure variant of a [`ConversionResult`](crate::ConversionResult).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ConversionError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
}

impl ConversionError {
    /// Decode-time failure for `path`
    pub fn unrecognized(path: &Path, cause: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::UnrecognizedImage,
            message: format!("cannot identify image file {}: {cause}", path.display()),
            detail: None,
        }
    }

    /// Any other failure. The full error chain is kept as diagnostic detail.
    pub fn other(error: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Other,
            message: format!("{error:#}"),
            detail: Some(format!("{error:?}")),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Debugging aid only; the format of this text is not stable.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_unrecognized(&self) -> bool {
        self.kind == ErrorKind::UnrecognizedImage
    }
}

/// Returned when a format name is not one of the supported targets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported target format: {0} (expected one of jpeg, png, webp, bmp, tiff)")]
pub struct UnsupportedFormat(pub String);

/// Returned when a background color string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid color {0:?}: use R,G,B (0-255 each) or #RRGGBB")]
pub struct ParseColorError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn display_leads_with_the_kind() {
        let err = ConversionError::unrecognized(Path::new("notes.png"), "bad magic");
        assert!(err.is_unrecognized());
        assert_eq!(
            err.to_string(),
            "unrecognized image: cannot identify image file notes.png: bad magic"
        );
        assert!(err.detail().is_none());
    }

    #[test]
    fn other_keeps_the_error_chain() {
        let err = ConversionError::other(anyhow!("disk full").context("Failed to write out.jpg"));
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.message(), "Failed to write out.jpg: disk full");
        let detail = err.detail().unwrap();
        assert!(detail.contains("Caused by"));
        assert!(detail.contains("disk full"));
    }
}
