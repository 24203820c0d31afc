//! # Job Executor
//!
//! Worker per la compressione di un singolo file:
//! verifica leggibilità → rileva formato → risolve la cascade → esegue →
//! verifica l'output → costruisce il `FileOutcome`.
//!
//! Qualunque errore diventa un outcome `Error`: l'executor ritorna sempre,
//! così il conteggio del batch non si interrompe per un file difettoso.

use crate::cascade::{CascadeOutput, StrategyCascade};
use crate::detect::FormatDetector;
use crate::error::CompressError;
use crate::level::CompressionOptions;
use crate::model::{FileOutcome, FileStatus, FileTask};
use crate::registry::CompressorRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};

pub struct JobExecutor {
    registry: Arc<CompressorRegistry>,
}

impl JobExecutor {
    pub fn new(registry: Arc<CompressorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CompressorRegistry> {
        &self.registry
    }

    /// Compress one file; never fails, errors end up in the outcome
    #[instrument(skip_all, fields(index = task.index, source = %task.source.display()))]
    pub async fn run(&self, task: &FileTask, options: &CompressionOptions) -> FileOutcome {
        let start = Instant::now();
        let mut outcome = FileOutcome::pending(task);
        outcome.transition(FileStatus::Processing);

        match self.compress(task, options, &mut outcome).await {
            Ok(output) => {
                debug!(
                    "{} -> {} ({:?})",
                    task.source.display(),
                    output.path.display(),
                    output.backend
                );
                outcome.complete(output);
            }
            Err(e) => {
                error!("Failed to compress {}: {}", task.source.display(), e);
                outcome.fail(e.to_string());
            }
        }
        outcome.elapsed = start.elapsed();
        outcome
    }

    async fn compress(
        &self,
        task: &FileTask,
        options: &CompressionOptions,
        outcome: &mut FileOutcome,
    ) -> Result<CascadeOutput, CompressError> {
        outcome.original_size = Self::check_readable(&task.source).await?;

        let cascade = self.cascade_for(task, outcome).await?;
        let output = cascade.execute(&task.source, options).await?;

        let size = tokio::fs::metadata(&output.path)
            .await
            .map_err(|e| CompressError::invalid_output(output.backend.unwrap_or("copy"), e.to_string()))?
            .len();
        if size != output.size {
            debug!("Output size changed on disk: {} -> {} bytes", output.size, size);
        }
        Ok(CascadeOutput { size, ..output })
    }

    /// Cascade chosen at batch start, or a fresh lookup for tasks built without one
    async fn cascade_for(
        &self,
        task: &FileTask,
        outcome: &mut FileOutcome,
    ) -> Result<Arc<StrategyCascade>, CompressError> {
        if let Some(cascade) = &task.cascade {
            return Ok(cascade.clone());
        }
        let format = if task.format.extension.is_empty() {
            FormatDetector::detect(&task.source).await
        } else {
            task.format.clone()
        };
        outcome.category = format.category;
        self.registry.resolve(format.category, &format.extension)
    }

    async fn check_readable(path: &Path) -> Result<u64, CompressError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| CompressError::unreadable(path, e))?;
        if !metadata.is_file() {
            return Err(CompressError::unreadable(path, "not a regular file"));
        }
        tokio::fs::File::open(path)
            .await
            .map_err(|e| CompressError::unreadable(path, e))?;
        Ok(metadata.len())
    }
}
