//! # Progress Tracking Module
//!
//! Punto unico in cui i worker segnalano il completamento di un file.
//! Il contatore e la notifica ai listener avvengono sotto lo stesso lock:
//! così `completed` cresce sempre di uno e gli eventi non arrivano mai
//! fuori ordine o duplicati, anche con più worker in parallelo.

use crate::model::{BatchResult, FileOutcome};
use std::sync::{Arc, Mutex};

/// Receives per-file progress and the final batch result
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, outcome: &FileOutcome, total: usize, completed: usize);

    fn on_batch_complete(&self, _result: &BatchResult) {}
}

impl<F> ProgressListener for F
where
    F: Fn(&FileOutcome, usize, usize) + Send + Sync,
{
    fn on_progress(&self, outcome: &FileOutcome, total: usize, completed: usize) {
        self(outcome, total, completed)
    }
}

/// Serialized progress gate shared by every worker of a batch
pub struct ProgressTracker {
    total: usize,
    completed: Mutex<usize>,
    listeners: Vec<Arc<dyn ProgressListener>>,
}

impl ProgressTracker {
    pub fn new(total: usize, listeners: Vec<Arc<dyn ProgressListener>>) -> Self {
        Self {
            total,
            completed: Mutex::new(0),
            listeners,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Count one finished file and notify listeners; returns the new count
    pub fn record(&self, outcome: &FileOutcome) -> usize {
        let mut completed = self.completed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *completed >= self.total {
            tracing::warn!("Progress already complete, ignoring {}", outcome.source.display());
            return *completed;
        }
        *completed += 1;
        for listener in &self.listeners {
            listener.on_progress(outcome, self.total, *completed);
        }
        *completed
    }

    pub fn completed(&self) -> usize {
        *self.completed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn finish(&self, result: &BatchResult) {
        for listener in &self.listeners {
            listener.on_batch_complete(result);
        }
    }
}
