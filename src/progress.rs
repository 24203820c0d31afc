//! # Progress Reporting Module
//!
//! Feedback da terminale per i batch lanciati da riga di comando.
//!
//! ## Componenti principali:
//! - `ProgressReporter`: progress bar `indicatif`, aggiornata a ogni file completato
//! - `format_summary()`: riepilogo finale del `BatchResult`
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:12] [========================>---------------] 12/20 (60%) [OK] photo.jpg: 45.2% saved
//! ```

use crate::file_manager::FileManager;
use crate::model::{BatchResult, FileOutcome, FileStatus};
use crate::optimizer::ProgressListener;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar fed by the batch runner
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Reporter that draws nothing, for tests and JSON mode
    pub fn hidden(total_files: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total_files);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Status line shown next to the bar for one finished file
    pub fn describe(outcome: &FileOutcome) -> String {
        let name = outcome
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match outcome.status() {
            FileStatus::Completed if outcome.backend.is_none() => format!("[COPY] {}: kept as is", name),
            FileStatus::Completed => format!("[OK] {}: {:.1}% saved", name, outcome.compression_ratio()),
            FileStatus::Error => format!(
                "[ERROR] {}: {}",
                name,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            FileStatus::Cancelled => format!("[SKIP] {}: cancelled", name),
            FileStatus::Pending | FileStatus::Processing => name,
        }
    }
}

impl ProgressListener for ProgressReporter {
    fn on_progress(&self, outcome: &FileOutcome, _total: usize, completed: usize) {
        self.bar.set_position(completed as u64);
        self.bar.set_message(Self::describe(outcome));
    }

    fn on_batch_complete(&self, result: &BatchResult) {
        self.finish(&result.message);
    }
}

/// Final report printed after a batch
pub fn format_summary(result: &BatchResult) -> String {
    let mut lines = vec![
        result.message.clone(),
        format!(
            "Files: {} total | {} completed | {} failed | {} cancelled",
            result.total_files, result.files_completed, result.files_failed, result.files_cancelled
        ),
    ];
    if result.files_completed > 0 {
        lines.push(format!(
            "Size: {} -> {} | Saved: {} ({:.2}%)",
            FileManager::format_size(result.total_original_size),
            FileManager::format_size(result.total_compressed_size),
            FileManager::format_size(result.bytes_saved()),
            result.overall_ratio
        ));
    }
    for outcome in result.outcomes.iter().filter(|o| o.status() == FileStatus::Error) {
        lines.push(format!(
            "  ✗ {}: {}",
            outcome.source.display(),
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
    lines.push(format!("Elapsed: {:.2}s", result.elapsed.as_secs_f64()));
    lines.join("\n")
}
