//! # Error Types Module
//!
//! Questo modulo definisce la tassonomia degli errori del motore di compressione.
//!
//! ## Livelli di errore:
//! - **Tentativo** (`BackendUnavailable`, `BackendTimeout`, `BackendOutputInvalid`,
//!   `ToolFailed`, e gli errori di I/O/codec durante un tentativo): assorbiti dalla
//!   cascade, che passa al backend successivo
//! - **File** (`UnsupportedFormat`, `SourceUnreadable`, `Undecodable`): diventano un
//!   `FileOutcome` con stato `Error`, senza mai interrompere il batch
//! - **Batch** (`BatchCancelled`): stato terminale `Cancelled`, non un errore
//!
//! ## Esempio:
//! ```rust,ignore
//! if !probe.available(Capability::Tool(&GHOSTSCRIPT)).await {
//!     return Err(CompressError::BackendUnavailable("gs".to_string()));
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while compressing files
#[derive(thiserror::Error, Debug)]
pub enum CompressError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend {backend} timed out after {timeout:?}")]
    BackendTimeout { backend: String, timeout: Duration },

    #[error("Backend {backend} produced invalid output: {reason}")]
    BackendOutputInvalid { backend: String, reason: String },

    #[error("{tool} exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Cannot read source file {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Cannot decode {path}: {reason}")]
    Undecodable { path: PathBuf, reason: String },

    #[error("Batch cancelled")]
    BatchCancelled,

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF processing error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Zip container error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl CompressError {
    /// Whether the cascade should absorb this error and move on to the next backend.
    pub fn is_attempt_level(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedFormat(_)
                | Self::SourceUnreadable { .. }
                | Self::Undecodable { .. }
                | Self::BatchCancelled
        )
    }

    pub fn invalid_output(backend: &str, reason: impl Into<String>) -> Self {
        Self::BackendOutputInvalid {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn undecodable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Undecodable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_level_classification() {
        assert!(CompressError::BackendUnavailable("gs".into()).is_attempt_level());
        assert!(CompressError::invalid_output("cjpeg", "larger than input").is_attempt_level());
        assert!(CompressError::BackendTimeout {
            backend: "ffmpeg".into(),
            timeout: Duration::from_secs(1),
        }
        .is_attempt_level());

        assert!(!CompressError::UnsupportedFormat("svg".into()).is_attempt_level());
        assert!(!CompressError::unreadable("/missing", "not found").is_attempt_level());
        assert!(!CompressError::BatchCancelled.is_attempt_level());
    }

    #[test]
    fn test_messages() {
        let err = CompressError::undecodable("/tmp/bad.jpg", "invalid marker");
        assert_eq!(err.to_string(), "Cannot decode /tmp/bad.jpg: invalid marker");
    }
}
