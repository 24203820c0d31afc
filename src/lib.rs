//! # File Compressor Library
//!
//! Motore di compressione multi-formato: per ogni file sceglie una cascade
//! di backend (tool esterni o librerie) e tiene il primo risultato più
//! piccolo dell'originale, altrimenti copia il file così com'è.
//!
//! ## Architettura dei moduli:
//! - `level` / `params`: livelli di compressione e parametri concreti per backend
//! - `detect`: riconoscimento di categoria, estensione e MIME type
//! - `probe` / `process` / `tool_resolver`: disponibilità ed esecuzione dei tool esterni
//! - `cascade`: backend ordinati per categoria con fallback a copia
//! - `registry`: tabella categoria → cascade
//! - `model`: task, outcome e risultato del batch
//! - `optimizer`: esecuzione dei singoli job e del batch parallelo
//! - `config`, `file_manager`, `progress`, `json_output`: contorno per la CLI
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use file_compressor::{BackendProbe, BatchRunner, CancelToken, CompressorRegistry, Config, FileOutcome};
//! use std::sync::Arc;
//!
//! # async fn demo(files: Vec<std::path::PathBuf>) {
//! let registry = Arc::new(CompressorRegistry::new(BackendProbe::shared()));
//! let runner = BatchRunner::new(registry);
//! let result = runner
//!     .run(files, Config::default().options(), |_: &FileOutcome, _: usize, _: usize| {}, &CancelToken::new())
//!     .await;
//! println!("{}", result.message);
//! # }
//! ```

pub mod cascade;
pub mod config;
pub mod detect;
pub mod error;
pub mod file_manager;
pub mod json_output;
pub mod level;
pub mod model;
pub mod optimizer;
pub mod params;
pub mod probe;
pub mod process;
pub mod progress;
pub mod registry;
pub mod tool_resolver;
pub mod utils;

pub use cascade::{CascadeOutput, StrategyCascade};
pub use config::Config;
pub use detect::{Category, DetectedFormat, FormatDetector};
pub use error::CompressError;
pub use level::{CompressionLevel, CompressionOptions, OutputFormat, ResizeBounds};
pub use model::{BatchResult, BatchState, FileOutcome, FileStatus, FileTask};
pub use optimizer::{BatchRunner, CancelToken, JobExecutor, ProgressListener};
pub use params::ParameterMapper;
pub use probe::BackendProbe;
pub use registry::CompressorRegistry;
