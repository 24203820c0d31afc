//! # Batch Runner
//!
//! Orchestratore di un batch: un task tokio per file, limitati da un
//! semaforo grande quanto il pool di worker.
//!
//! ## Ciclo di vita:
//! `Created → Running → {Completed | Cancelled | Failed}`
//!
//! ## Cancellazione:
//! cooperativa. Il token viene controllato prima e dopo l'attesa del
//! permesso; i file già in elaborazione terminano da soli (o per timeout
//! della loro cascade), quelli non ancora partiti diventano `Cancelled`.

use crate::level::CompressionOptions;
use crate::model::{BatchResult, BatchState, FileOutcome, FileTask};
use crate::optimizer::job_executor::JobExecutor;
use crate::optimizer::progress_tracker::{ProgressListener, ProgressTracker};
use crate::registry::CompressorRegistry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Shared cancellation flag, cheap to clone into signal handlers
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BatchRunner {
    executor: Arc<JobExecutor>,
    workers: usize,
    listeners: Vec<Arc<dyn ProgressListener>>,
    state: Mutex<BatchState>,
}

impl BatchRunner {
    pub fn new(registry: Arc<CompressorRegistry>) -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            executor: Arc::new(JobExecutor::new(registry)),
            workers,
            listeners: Vec::new(),
            state: Mutex::new(BatchState::Created),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Listener notified for every batch run by this runner
    pub fn add_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.push(listener);
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn state(&self) -> BatchState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: BatchState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Compress every file; returns once all of them reached a terminal status
    pub async fn run(
        &self,
        files: Vec<PathBuf>,
        options: CompressionOptions,
        on_progress: impl ProgressListener + 'static,
        cancel: &CancelToken,
    ) -> BatchResult {
        self.set_state(BatchState::Running);
        let mut tasks = Vec::with_capacity(files.len());
        for (index, source) in files.into_iter().enumerate() {
            tasks.push(FileTask::prepare(index, source, self.executor.registry()).await);
        }
        self.run_tasks(tasks, options, on_progress, cancel).await
    }

    /// Run tasks whose format and cascade were already resolved
    pub async fn run_tasks(
        &self,
        tasks: Vec<FileTask>,
        options: CompressionOptions,
        on_progress: impl ProgressListener + 'static,
        cancel: &CancelToken,
    ) -> BatchResult {
        let start = Instant::now();
        self.set_state(BatchState::Running);
        info!("Starting batch of {} files with {} workers", tasks.len(), self.workers);

        let mut listeners = self.listeners.clone();
        listeners.push(Arc::new(on_progress));
        let tracker = Arc::new(ProgressTracker::new(tasks.len(), listeners));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let options = Arc::new(options);

        let handles: Vec<_> = tasks
            .iter()
            .cloned()
            .map(|task| {
                let executor = self.executor.clone();
                let tracker = tracker.clone();
                let semaphore = semaphore.clone();
                let options = options.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if cancel.is_cancelled() {
                        return Self::cancelled(&task, &tracker);
                    }
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return Self::cancelled(&task, &tracker),
                    };
                    if cancel.is_cancelled() {
                        return Self::cancelled(&task, &tracker);
                    }
                    let outcome = executor.run(&task, &options).await;
                    tracker.record(&outcome);
                    outcome
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (task, joined) in tasks.iter().zip(futures::future::join_all(handles).await) {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Worker for {} aborted: {}", task.source.display(), e);
                    let mut outcome = FileOutcome::pending(task);
                    outcome.fail(format!("Worker task failed: {}", e));
                    tracker.record(&outcome);
                    outcomes.push(outcome);
                }
            }
        }

        let result = BatchResult::from_outcomes(outcomes, cancel.is_cancelled(), start.elapsed());
        self.set_state(result.state);
        tracker.finish(&result);
        info!(
            "{} in {:.2}s ({} completed, {} failed, {} cancelled)",
            result.message,
            result.elapsed.as_secs_f64(),
            result.files_completed,
            result.files_failed,
            result.files_cancelled
        );
        result
    }

    fn cancelled(task: &FileTask, tracker: &ProgressTracker) -> FileOutcome {
        debug!("Skipping {}: batch cancelled", task.source.display());
        let mut outcome = FileOutcome::pending(task);
        outcome.cancel();
        tracker.record(&outcome);
        outcome
    }
}
