//! # Batch Model
//!
//! Tipi che descrivono un batch di compressione:
//! - `FileTask`: un file in ingresso, creato una volta all'avvio del batch
//! - `FileOutcome`: il risultato di un file, scritto da un solo worker
//! - `BatchResult`: la vista aggregata, costruita solo a batch terminato
//!
//! Lo stato di un file avanza solo in avanti:
//! `Pending → Processing → {Completed | Error | Cancelled}`.

use crate::cascade::{BackendAttempt, CascadeOutput, StrategyCascade};
use crate::detect::{Category, DetectedFormat, FormatDetector};
use crate::registry::CompressorRegistry;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle forward-only
    pub fn can_become(self, next: FileStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One input file of a batch
#[derive(Clone)]
pub struct FileTask {
    /// Position in the submitted list
    pub index: usize,
    pub source: PathBuf,
    pub format: DetectedFormat,
    /// Cascade picked at batch start; `None` when the format is unsupported
    pub cascade: Option<Arc<StrategyCascade>>,
}

impl FileTask {
    /// Task whose format is still to be detected
    pub fn new(index: usize, source: impl Into<PathBuf>) -> Self {
        Self {
            index,
            source: source.into(),
            format: DetectedFormat::unknown(),
            cascade: None,
        }
    }

    /// Detect the format and look up the cascade once, at batch start
    pub async fn prepare(index: usize, source: PathBuf, registry: &CompressorRegistry) -> Self {
        let format = FormatDetector::detect(&source).await;
        let cascade = registry.resolve(format.category, &format.extension).ok();
        Self { index, source, format, cascade }
    }
}

impl fmt::Debug for FileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTask")
            .field("index", &self.index)
            .field("source", &self.source)
            .field("format", &self.format)
            .field("cascade", &self.cascade.as_ref().map(|c| c.category()))
            .finish()
    }
}

/// Result of one file; exactly one per `FileTask`
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub index: usize,
    pub source: PathBuf,
    pub category: Category,
    status: FileStatus,
    pub original_size: u64,
    pub compressed_size: u64,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Backend whose output was kept; `None` for copies and failures
    pub backend: Option<&'static str>,
    #[serde(skip)]
    pub attempts: Vec<BackendAttempt>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl FileOutcome {
    pub fn pending(task: &FileTask) -> Self {
        Self {
            index: task.index,
            source: task.source.clone(),
            category: task.format.category,
            status: FileStatus::Pending,
            original_size: 0,
            compressed_size: 0,
            output_path: None,
            error: None,
            backend: None,
            attempts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    /// Advance the lifecycle; backward moves are ignored and reported as `false`
    pub fn transition(&mut self, next: FileStatus) -> bool {
        if self.status.can_become(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                "Ignoring status change {} -> {} for {}",
                self.status,
                next,
                self.source.display()
            );
            false
        }
    }

    pub fn complete(&mut self, output: CascadeOutput) {
        if self.transition(FileStatus::Completed) {
            self.original_size = output.original_size;
            debug_assert!(
                output.size <= output.original_size,
                "cascade accepted an output larger than its source"
            );
            self.compressed_size = output.size;
            self.output_path = Some(output.path);
            self.backend = output.backend;
            self.attempts = output.attempts;
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.transition(FileStatus::Error) {
            self.error = Some(message.into());
        }
    }

    pub fn cancel(&mut self) {
        self.transition(FileStatus::Cancelled);
    }

    /// Percentage saved, 0 when nothing was produced
    pub fn compression_ratio(&self) -> f64 {
        if self.status != FileStatus::Completed || self.original_size == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_size as f64 / self.original_size as f64) * 100.0
    }

    pub fn bytes_saved(&self) -> u64 {
        if self.status == FileStatus::Completed {
            self.original_size.saturating_sub(self.compressed_size)
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Aggregate view over every outcome of a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub state: BatchState,
    pub success: bool,
    pub message: String,
    pub total_files: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    /// Percentage saved over the whole batch
    pub overall_ratio: f64,
    /// Mean of the per-file ratios of completed files
    pub average_ratio: f64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchResult {
    pub fn from_outcomes(mut outcomes: Vec<FileOutcome>, cancelled: bool, elapsed: Duration) -> Self {
        outcomes.sort_by_key(|o| o.index);
        let total_files = outcomes.len();
        let count = |status: FileStatus| outcomes.iter().filter(|o| o.status == status).count();
        let files_completed = count(FileStatus::Completed);
        let files_failed = count(FileStatus::Error);
        let files_cancelled = count(FileStatus::Cancelled);

        let completed = || outcomes.iter().filter(|o| o.status == FileStatus::Completed);
        let total_original_size: u64 = completed().map(|o| o.original_size).sum();
        let total_compressed_size: u64 = completed().map(|o| o.compressed_size).sum();
        let overall_ratio = if total_original_size > 0 {
            (1.0 - total_compressed_size as f64 / total_original_size as f64) * 100.0
        } else {
            0.0
        };
        let average_ratio = if files_completed > 0 {
            completed().map(FileOutcome::compression_ratio).sum::<f64>() / files_completed as f64
        } else {
            0.0
        };

        let (state, success, message) = if total_files == 0 {
            (BatchState::Completed, false, "No files to compress".to_string())
        } else if cancelled && files_cancelled > 0 {
            (
                BatchState::Cancelled,
                files_completed > 0,
                format!(
                    "Compression cancelled after {} of {} files",
                    files_completed + files_failed,
                    total_files
                ),
            )
        } else if files_completed == 0 {
            (BatchState::Failed, false, format!("All {} files failed", total_files))
        } else {
            (
                BatchState::Completed,
                true,
                format!(
                    "Compressed {} files successfully ({} failed). Average compression: {:.1}%",
                    files_completed, files_failed, average_ratio
                ),
            )
        };

        Self {
            state,
            success,
            message,
            total_files,
            files_completed,
            files_failed,
            files_cancelled,
            total_original_size,
            total_compressed_size,
            overall_ratio,
            average_ratio,
            elapsed,
            outcomes,
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        self.total_original_size.saturating_sub(self.total_compressed_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, status: FileStatus, original: u64, compressed: u64) -> FileOutcome {
        let mut outcome = FileOutcome::pending(&FileTask::new(index, format!("/in/{}.jpg", index)));
        match status {
            FileStatus::Completed => {
                outcome.transition(FileStatus::Processing);
                outcome.complete(CascadeOutput {
                    path: PathBuf::from(format!("/out/{}.jpg", index)),
                    size: compressed,
                    original_size: original,
                    backend: Some("image-library"),
                    attempts: Vec::new(),
                });
            }
            FileStatus::Error => outcome.fail("Cannot decode"),
            FileStatus::Cancelled => outcome.cancel(),
            _ => {}
        }
        outcome
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut outcome = FileOutcome::pending(&FileTask::new(0, "/in/a.png"));
        assert!(outcome.transition(FileStatus::Processing));
        assert!(!outcome.transition(FileStatus::Pending));
        assert!(outcome.transition(FileStatus::Error));
        assert!(!outcome.transition(FileStatus::Completed));
        assert_eq!(outcome.status(), FileStatus::Error);
        assert!(!FileStatus::Processing.can_become(FileStatus::Processing));
    }

    #[test]
    fn test_ratio_and_saved_bytes() {
        let done = outcome(0, FileStatus::Completed, 1000, 250);
        assert!((done.compression_ratio() - 75.0).abs() < f64::EPSILON);
        assert_eq!(done.bytes_saved(), 750);

        let failed = outcome(1, FileStatus::Error, 0, 0);
        assert_eq!(failed.compression_ratio(), 0.0);
        assert_eq!(failed.error.as_deref(), Some("Cannot decode"));
    }

    #[test]
    fn test_copy_reports_source_size() {
        let done = outcome(0, FileStatus::Completed, 100, 100);
        assert_eq!(done.compressed_size, 100);
        assert_eq!(done.compression_ratio(), 0.0);
        assert_eq!(done.bytes_saved(), 0);
    }

    #[test]
    fn test_batch_summary_messages() {
        let result = BatchResult::from_outcomes(
            vec![
                outcome(2, FileStatus::Error, 0, 0),
                outcome(0, FileStatus::Completed, 1000, 500),
                outcome(1, FileStatus::Completed, 1000, 700),
            ],
            false,
            Duration::from_secs(1),
        );
        assert_eq!(result.state, BatchState::Completed);
        assert!(result.success);
        assert_eq!(result.files_failed, 1);
        assert_eq!(result.outcomes[0].index, 0);
        assert_eq!(
            result.message,
            "Compressed 2 files successfully (1 failed). Average compression: 40.0%"
        );
        assert!((result.overall_ratio - 40.0).abs() < 1e-9);

        let failed = BatchResult::from_outcomes(vec![outcome(0, FileStatus::Error, 0, 0)], false, Duration::ZERO);
        assert_eq!(failed.state, BatchState::Failed);
        assert!(!failed.success);
        assert_eq!(failed.message, "All 1 files failed");

        let empty = BatchResult::from_outcomes(Vec::new(), false, Duration::ZERO);
        assert!(!empty.success);
        assert_eq!(empty.message, "No files to compress");
    }

    #[test]
    fn test_cancelled_batch_counts() {
        let result = BatchResult::from_outcomes(
            vec![
                outcome(0, FileStatus::Completed, 10, 5),
                outcome(1, FileStatus::Cancelled, 0, 0),
                outcome(2, FileStatus::Cancelled, 0, 0),
            ],
            true,
            Duration::ZERO,
        );
        assert_eq!(result.state, BatchState::Cancelled);
        assert!(result.success);
        assert_eq!(result.message, "Compression cancelled after 1 of 3 files");
        assert_eq!(
            result.files_completed + result.files_failed + result.files_cancelled,
            result.total_files
        );
    }

    #[test]
    fn test_late_cancel_keeps_completed_batch() {
        let result = BatchResult::from_outcomes(
            vec![
                outcome(0, FileStatus::Completed, 10, 5),
                outcome(1, FileStatus::Completed, 10, 10),
            ],
            true,
            Duration::ZERO,
        );
        assert_eq!(result.state, BatchState::Completed);
        assert!(result.success);
        assert_eq!(result.files_cancelled, 0);
        assert!(result.message.starts_with("Compressed 2 files successfully"));
    }
}
