//! # Optimizer Module
//!
//! Esecuzione dei batch, separata in sottomoduli:
//! - `batch_runner`: pool di worker, cancellazione e aggregazione
//! - `job_executor`: worker per singoli file
//! - `progress_tracker`: contatore e notifica progress serializzati
//! - `path_resolver`: nomi di output senza collisioni

pub mod batch_runner;
pub mod job_executor;
pub mod path_resolver;
pub mod progress_tracker;

pub use batch_runner::{BatchRunner, CancelToken};
pub use job_executor::JobExecutor;
pub use path_resolver::PathResolver;
pub use progress_tracker::{ProgressListener, ProgressTracker};
