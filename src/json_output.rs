//! # JSON Output Module
//!
//! Output strutturato in JSON (una riga per evento su stdout) per chi
//! pilota il compressore da un altro processo.
//!
//! ## Tipi di messaggi:
//! - `start`: inizio del batch con la configurazione effettiva
//! - `file_complete`: fine elaborazione di un file
//! - `progress`: contatore dei file completati
//! - `complete`: fine del batch con le statistiche finali
//! - `error`: errore che impedisce di avviare il batch

use crate::detect::Category;
use crate::level::{CompressionLevel, OutputFormat, ResizeBounds};
use crate::model::{BatchResult, BatchState, FileOutcome, FileStatus};
use crate::optimizer::ProgressListener;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    Start {
        inputs: Vec<PathBuf>,
        output_dir: Option<PathBuf>,
        total_files: usize,
        config: JsonConfig,
    },

    FileComplete {
        index: usize,
        path: PathBuf,
        output_path: Option<PathBuf>,
        category: Category,
        status: FileStatus,
        original_size: u64,
        compressed_size: u64,
        reduction_percent: f64,
        backend: Option<&'static str>,
        error: Option<String>,
        duration_seconds: f64,
    },

    Progress {
        current: usize,
        total: usize,
        percentage: f64,
    },

    Complete {
        state: BatchState,
        success: bool,
        message: String,
        files_completed: usize,
        files_failed: usize,
        files_cancelled: usize,
        total_original_size: u64,
        total_compressed_size: u64,
        total_bytes_saved: u64,
        average_reduction: f64,
        duration_seconds: f64,
    },

    Error {
        message: String,
        details: Option<String>,
    },
}

/// Effective settings echoed in the `start` event
#[derive(Debug, Serialize)]
pub struct JsonConfig {
    pub level: CompressionLevel,
    pub workers: usize,
    pub resize: Option<ResizeBounds>,
    pub output_format: OutputFormat,
}

impl JsonMessage {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Print the message on stdout
    pub fn emit(&self) {
        let line = self.to_line();
        if !line.is_empty() {
            println!("{}", line);
        }
    }

    pub fn start(inputs: Vec<PathBuf>, output_dir: Option<PathBuf>, total_files: usize, config: JsonConfig) -> Self {
        Self::Start {
            inputs,
            output_dir,
            total_files,
            config,
        }
    }

    pub fn file_complete(outcome: &FileOutcome) -> Self {
        Self::FileComplete {
            index: outcome.index,
            path: outcome.source.clone(),
            output_path: outcome.output_path.clone(),
            category: outcome.category,
            status: outcome.status(),
            original_size: outcome.original_size,
            compressed_size: outcome.compressed_size,
            reduction_percent: outcome.compression_ratio(),
            backend: outcome.backend,
            error: outcome.error.clone(),
            duration_seconds: outcome.elapsed.as_secs_f64(),
        }
    }

    pub fn progress(current: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self::Progress { current, total, percentage }
    }

    pub fn complete(result: &BatchResult) -> Self {
        Self::Complete {
            state: result.state,
            success: result.success,
            message: result.message.clone(),
            files_completed: result.files_completed,
            files_failed: result.files_failed,
            files_cancelled: result.files_cancelled,
            total_original_size: result.total_original_size,
            total_compressed_size: result.total_compressed_size,
            total_bytes_saved: result.bytes_saved(),
            average_reduction: result.average_ratio,
            duration_seconds: result.elapsed.as_secs_f64(),
        }
    }

    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }
}

/// Listener that streams batch events as JSON lines
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReporter;

impl ProgressListener for JsonReporter {
    fn on_progress(&self, outcome: &FileOutcome, total: usize, completed: usize) {
        JsonMessage::file_complete(outcome).emit();
        JsonMessage::progress(completed, total).emit();
    }

    fn on_batch_complete(&self, result: &BatchResult) {
        JsonMessage::complete(result).emit();
    }
}
