//! # Strategy Cascade
//!
//! Una cascade è una lista ordinata di backend (tool esterni o librerie
//! in-process) per una categoria di file. I backend vengono provati in ordine
//! di priorità; il primo output valido e più piccolo dell'originale vince.
//!
//! ## Contratto per tentativo:
//! 1. Backend non applicabile o capability non disponibile → salta, costo zero
//! 2. Esecuzione sotto timeout rigido (per categoria, estendibile per backend)
//! 3. Output valido solo se esiste, non è vuoto ed è strettamente più piccolo
//!    del file sorgente; altrimenti viene scartato e si passa al successivo
//! 4. Esauriti i backend, copia byte-per-byte della sorgente
//!
//! Gli errori dei singoli tentativi (crash del tool, I/O, timeout) restano
//! dentro la cascade. Solo un preparatore che non riesce a decodificare la
//! sorgente, o una copia impossibile, diventano errori del file.

pub mod archive;
pub mod container;
pub mod document;
pub mod image;
pub mod media;
pub mod pdf;
pub mod tool;

use crate::detect::{extension_of, Category};
use crate::error::CompressError;
use crate::level::{CompressionLevel, CompressionOptions};
use crate::optimizer::path_resolver::PathResolver;
use crate::probe::{BackendProbe, Capability};
use crate::process::ToolRunner;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// The file backends actually work on, after category-specific preparation
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub path: PathBuf,
    /// Extension outputs get unless a backend says otherwise
    pub target_ext: String,
    /// The original source already matches the target and needs no transformation
    pub source_reusable: bool,
}

impl PreparedInput {
    pub fn passthrough(source: &Path) -> Self {
        Self {
            path: source.to_path_buf(),
            target_ext: extension_of(source),
            source_reusable: true,
        }
    }
}

/// Category-specific step run once before any backend
#[async_trait]
pub trait InputPreparer: Send + Sync {
    async fn prepare(
        &self,
        source: &Path,
        options: &CompressionOptions,
        workdir: &Path,
    ) -> Result<PreparedInput, CompressError>;
}

/// Everything a backend may look at during one attempt
pub struct AttemptContext<'a> {
    pub source: &'a Path,
    pub source_size: u64,
    pub prepared: &'a PreparedInput,
    pub options: &'a CompressionOptions,
    pub runner: &'a ToolRunner,
    pub workdir: &'a Path,
    pub timeout: Duration,
}

impl AttemptContext<'_> {
    pub fn level(&self) -> CompressionLevel {
        self.options.level
    }

    /// Extension of the original source file
    pub fn source_ext(&self) -> String {
        extension_of(self.source)
    }
}

/// One compression strategy
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &'static str;

    /// Tool or encoder that must be present; `None` for in-process backends
    fn capability(&self) -> Option<Capability> {
        None
    }

    fn applies(&self, _ctx: &AttemptContext<'_>) -> bool {
        true
    }

    fn output_extension(&self, ctx: &AttemptContext<'_>) -> String {
        ctx.prepared.target_ext.clone()
    }

    fn timeout(&self, category_default: Duration) -> Duration {
        crate::params::ParameterMapper::extended_timeout(self.id(), category_default)
    }

    /// Write the compressed result to `output`
    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum AttemptResult {
    Accepted,
    Unavailable,
    TimedOut,
    /// Ran, but the output failed validation
    Rejected(String),
    Failed(String),
}

/// Diagnostic record of one cascade step
#[derive(Debug, Clone, Serialize)]
pub struct BackendAttempt {
    pub backend: &'static str,
    pub result: AttemptResult,
    pub output_size: Option<u64>,
    pub duration: Duration,
}

impl BackendAttempt {
    pub fn succeeded(&self) -> bool {
        self.result == AttemptResult::Accepted
    }
}

/// What a cascade run produced
#[derive(Debug, Clone)]
pub struct CascadeOutput {
    pub path: PathBuf,
    pub size: u64,
    pub original_size: u64,
    /// Winning backend, `None` for the copy-through fallback
    pub backend: Option<&'static str>,
    pub attempts: Vec<BackendAttempt>,
}

impl CascadeOutput {
    pub fn is_copy(&self) -> bool {
        self.backend.is_none()
    }
}

pub struct StrategyCascade {
    category: Category,
    extensions: Vec<&'static str>,
    preparer: Option<Arc<dyn InputPreparer>>,
    backends: Vec<Arc<dyn Backend>>,
    probe: Arc<BackendProbe>,
}

impl fmt::Debug for StrategyCascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyCascade")
            .field("category", &self.category)
            .field("extensions", &self.extensions)
            .field("backends", &self.backend_ids())
            .finish_non_exhaustive()
    }
}

impl StrategyCascade {
    pub fn new(category: Category, extensions: &[&'static str], probe: Arc<BackendProbe>) -> Self {
        Self {
            category,
            extensions: extensions.to_vec(),
            preparer: None,
            backends: Vec::new(),
            probe,
        }
    }

    pub fn with_preparer(mut self, preparer: impl InputPreparer + 'static) -> Self {
        self.preparer = Some(Arc::new(preparer));
        self
    }

    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }

    pub fn supports(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.extensions.iter().any(|e| *e == extension)
    }

    pub fn probe(&self) -> Arc<BackendProbe> {
        self.probe.clone()
    }

    pub fn backend_ids(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.id()).collect()
    }

    /// Run the cascade for one source file and leave the result in the output directory
    #[instrument(skip_all, fields(category = self.category.name(), source = %source.display()))]
    pub async fn execute(&self, source: &Path, options: &CompressionOptions) -> Result<CascadeOutput, CompressError> {
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| CompressError::unreadable(source, e))?;
        if !metadata.is_file() {
            return Err(CompressError::unreadable(source, "not a regular file"));
        }
        let source_size = metadata.len();
        let output_dir = PathResolver::output_dir_for(source, options.output_dir.as_deref());
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut attempts = Vec::new();
        let workdir = match tempfile::Builder::new().prefix(".fc-work-").tempdir_in(&output_dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot create work directory in {}: {}", output_dir.display(), e);
                return self.copy_fallback(source, source_size, &output_dir, options, attempts).await;
            }
        };

        let prepared = match &self.preparer {
            Some(preparer) => match preparer.prepare(source, options, workdir.path()).await {
                Ok(prepared) => prepared,
                Err(e) if !e.is_attempt_level() => return Err(e),
                Err(e) => {
                    warn!("Preparation failed for {}: {}", source.display(), e);
                    return self.copy_fallback(source, source_size, &output_dir, options, attempts).await;
                }
            },
            None => PreparedInput::passthrough(source),
        };

        let category_timeout = options.timeouts.for_category(self.category);
        for (index, backend) in self.backends.iter().enumerate() {
            let ctx = AttemptContext {
                source,
                source_size,
                prepared: &prepared,
                options,
                runner: self.probe.runner(),
                workdir: workdir.path(),
                timeout: backend.timeout(category_timeout),
            };
            if !backend.applies(&ctx) {
                continue;
            }

            if let Some(capability) = backend.capability() {
                if !self.probe.available(&capability).await {
                    debug!("Skipping {}: {} not available", backend.id(), capability.key());
                    attempts.push(BackendAttempt {
                        backend: backend.id(),
                        result: AttemptResult::Unavailable,
                        output_size: None,
                        duration: Duration::ZERO,
                    });
                    continue;
                }
            }

            let extension = backend.output_extension(&ctx);
            let temp_output = workdir.path().join(format!("{}-{}.{}", index, backend.id(), extension));
            let timeout = ctx.timeout;

            let start = Instant::now();
            let outcome = tokio::time::timeout(timeout, backend.compress(&ctx, &temp_output)).await;
            let duration = start.elapsed();

            let result = match outcome {
                Err(_) => AttemptResult::TimedOut,
                Ok(Err(CompressError::BackendTimeout { .. })) => AttemptResult::TimedOut,
                Ok(Err(CompressError::BackendUnavailable(_))) => AttemptResult::Unavailable,
                Ok(Err(e)) => AttemptResult::Failed(e.to_string()),
                Ok(Ok(())) => match validate_output(&temp_output, source_size).await {
                    Ok(_) => AttemptResult::Accepted,
                    Err(reason) => AttemptResult::Rejected(reason),
                },
            };
            let output_size = tokio::fs::metadata(&temp_output).await.ok().map(|m| m.len());

            debug!(
                "{} -> {:?} ({:?} bytes) in {:.2}s",
                backend.id(),
                result,
                output_size,
                duration.as_secs_f64()
            );
            let accepted = result == AttemptResult::Accepted;
            if let AttemptResult::Failed(ref reason) = result {
                warn!("{} failed on {}: {}", backend.id(), source.display(), reason);
            }
            attempts.push(BackendAttempt {
                backend: backend.id(),
                result,
                output_size,
                duration,
            });

            if accepted {
                let reserved = PathResolver::allocate(source, &options.prefix, &output_dir, &extension).await?;
                if let Err(e) = PathResolver::publish(&temp_output, &reserved).await {
                    let _ = tokio::fs::remove_file(&reserved).await;
                    return Err(e.into());
                }
                let size = output_size.unwrap_or_default();
                info!(
                    "{} compressed by {}: {} -> {} bytes",
                    source.display(),
                    backend.id(),
                    source_size,
                    size
                );
                return Ok(CascadeOutput {
                    path: reserved,
                    size,
                    original_size: source_size,
                    backend: Some(backend.id()),
                    attempts,
                });
            }
            let _ = tokio::fs::remove_file(&temp_output).await;
        }

        self.copy_fallback(source, source_size, &output_dir, options, attempts).await
    }

    /// Byte-for-byte copy under the source's own extension
    async fn copy_fallback(
        &self,
        source: &Path,
        source_size: u64,
        output_dir: &Path,
        options: &CompressionOptions,
        attempts: Vec<BackendAttempt>,
    ) -> Result<CascadeOutput, CompressError> {
        let reserved = PathResolver::allocate(source, &options.prefix, output_dir, &extension_of(source)).await?;
        match tokio::fs::copy(source, &reserved).await {
            Ok(size) => {
                info!("No backend improved {}, copied as is", source.display());
                Ok(CascadeOutput {
                    path: reserved,
                    size,
                    original_size: source_size,
                    backend: None,
                    attempts,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&reserved).await;
                Err(CompressError::unreadable(source, e))
            }
        }
    }
}

/// Output must exist, be non-empty and be strictly smaller than the source
pub async fn validate_output(path: &Path, source_size: u64) -> Result<u64, String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| "output file missing".to_string())?;
    let size = metadata.len();
    if size == 0 {
        return Err("output file is empty".to_string());
    }
    if size >= source_size {
        return Err(format!("output ({} bytes) not smaller than input ({} bytes)", size, source_size));
    }
    Ok(size)
}

/// Run CPU-bound library work on the blocking pool
pub async fn run_blocking<T, F>(work: F) -> Result<T, CompressError>
where
    F: FnOnce() -> Result<T, CompressError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CompressError::Task(e.to_string()))?
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that writes a fixed number of bytes
    pub struct FixedSizeBackend {
        pub id: &'static str,
        pub size: usize,
        pub capability: Option<Capability>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FixedSizeBackend {
        pub fn new(id: &'static str, size: usize) -> Self {
            Self { id, size, capability: None, calls: Arc::new(AtomicUsize::new(0)) }
        }

        pub fn requiring(mut self, capability: Capability) -> Self {
            self.capability = Some(capability);
            self
        }
    }

    #[async_trait]
    impl Backend for FixedSizeBackend {
        fn id(&self) -> &'static str {
            self.id
        }

        fn capability(&self) -> Option<Capability> {
            self.capability
        }

        async fn compress(&self, _ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(output, vec![b'z'; self.size]).await?;
            Ok(())
        }
    }

    pub struct FailingBackend;

    #[async_trait]
    impl Backend for FailingBackend {
        fn id(&self) -> &'static str {
            "failing"
        }

        async fn compress(&self, _ctx: &AttemptContext<'_>, _output: &Path) -> Result<(), CompressError> {
            Err(CompressError::ToolFailed {
                tool: "failing".into(),
                status: 1,
                stderr: "boom".into(),
            })
        }
    }

    pub struct SlowBackend;

    #[async_trait]
    impl Backend for SlowBackend {
        fn id(&self) -> &'static str {
            "slow"
        }

        async fn compress(&self, _ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tokio::fs::write(output, b"x").await?;
            Ok(())
        }
    }

    /// Backend that panics on the worker task itself
    pub struct PanickingBackend;

    #[async_trait]
    impl Backend for PanickingBackend {
        fn id(&self) -> &'static str {
            "panicking"
        }

        async fn compress(&self, _ctx: &AttemptContext<'_>, _output: &Path) -> Result<(), CompressError> {
            panic!("decoder blew up");
        }
    }

    /// Backend whose library work panics on the blocking pool
    pub struct BlockingPanicBackend;

    #[async_trait]
    impl Backend for BlockingPanicBackend {
        fn id(&self) -> &'static str {
            "blocking-panic"
        }

        async fn compress(&self, _ctx: &AttemptContext<'_>, _output: &Path) -> Result<(), CompressError> {
            run_blocking(|| -> Result<(), CompressError> { panic!("malformed xref table") }).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::probe::GHOSTSCRIPT;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    async fn source_file(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, vec![b'a'; size]).await.unwrap();
        path
    }

    fn options_into(dir: &Path) -> CompressionOptions {
        CompressionOptions {
            output_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_smaller_output_wins() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "data.bin", 1000).await;
        let second = FixedSizeBackend::new("second", 10);
        let second_calls = second.calls.clone();

        let cascade = StrategyCascade::new(Category::Archive, &["bin"], Arc::new(BackendProbe::offline()))
            .with_backend(FixedSizeBackend::new("first", 500))
            .with_backend(second);

        let output = cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();
        assert_eq!(output.backend, Some("first"));
        assert_eq!(output.size, 500);
        assert_eq!(output.path.file_name().unwrap(), "compressed_data.bin");
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_larger_output_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "data.bin", 100).await;
        let cascade = StrategyCascade::new(Category::Archive, &["bin"], Arc::new(BackendProbe::offline()))
            .with_backend(FixedSizeBackend::new("bloats", 200))
            .with_backend(FixedSizeBackend::new("same", 100))
            .with_backend(FixedSizeBackend::new("empty", 0))
            .with_backend(FixedSizeBackend::new("shrinks", 40));

        let output = cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();
        assert_eq!(output.backend, Some("shrinks"));
        let rejected = output
            .attempts
            .iter()
            .filter(|a| matches!(a.result, AttemptResult::Rejected(_)))
            .count();
        assert_eq!(rejected, 3);
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_skipped_without_running() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "doc.pdf", 100).await;
        let gated = FixedSizeBackend::new("gs", 10).requiring(Capability::Tool(&GHOSTSCRIPT));
        let gated_calls = gated.calls.clone();

        let cascade = StrategyCascade::new(Category::Pdf, &["pdf"], Arc::new(BackendProbe::offline()))
            .with_backend(gated);

        let output = cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();
        assert!(output.is_copy());
        assert_eq!(output.attempts[0].result, AttemptResult::Unavailable);
        assert_eq!(gated_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_fall_back_to_copy() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "song.mp3", 64).await;
        let cascade = StrategyCascade::new(Category::Audio, &["mp3"], Arc::new(BackendProbe::offline()))
            .with_backend(FailingBackend);

        let output = cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();
        assert!(output.is_copy());
        assert_eq!(output.size, 64);
        assert_eq!(output.path.extension().unwrap(), "mp3");
        assert_eq!(tokio::fs::read(&output.path).await.unwrap(), vec![b'a'; 64]);
        assert!(matches!(output.attempts[0].result, AttemptResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_panic_in_library_work_falls_back_to_copy() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "scan.pdf", 80).await;
        let cascade = StrategyCascade::new(Category::Pdf, &["pdf"], Arc::new(BackendProbe::offline()))
            .with_backend(BlockingPanicBackend)
            .with_backend(FixedSizeBackend::new("shrinks", 20));

        let output = cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();
        assert_eq!(output.backend, Some("shrinks"));
        match &output.attempts[0].result {
            AttemptResult::Failed(message) => assert!(message.starts_with("Worker task failed")),
            other => panic!("unexpected attempt result: {:?}", other),
        }
    }

    #[test]
    fn test_debug_lists_backends() {
        let cascade = StrategyCascade::new(Category::Audio, &["mp3", "wav"], Arc::new(BackendProbe::offline()))
            .with_backend(FailingBackend)
            .with_backend(SlowBackend);
        let debug = format!("{:?}", cascade);
        assert!(debug.starts_with("StrategyCascade"));
        assert!(debug.contains("Audio"));
        assert!(debug.contains(r#"["failing", "slow"]"#));
        assert!(debug.ends_with(".. }"));
    }

    #[tokio::test]
    async fn test_empty_cascade_copies() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "notes.txt", 10).await;
        let cascade = StrategyCascade::new(Category::Document, &["txt"], Arc::new(BackendProbe::offline()));

        let output = cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();
        assert!(output.is_copy());
        assert!(output.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "clip.mp4", 10).await;
        let mut options = options_into(temp_dir.path());
        options.timeouts.video = Duration::from_millis(100);
        let cascade = StrategyCascade::new(Category::Video, &["mp4"], Arc::new(BackendProbe::offline()))
            .with_backend(SlowBackend);

        let output = cascade.execute(&source, &options).await.unwrap();
        assert!(output.is_copy());
        assert_eq!(output.attempts[0].result, AttemptResult::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_source_is_terminal() {
        let temp_dir = TempDir::new().unwrap();
        let cascade = StrategyCascade::new(Category::Image, &["jpg"], Arc::new(BackendProbe::offline()));
        let err = cascade
            .execute(&temp_dir.path().join("gone.jpg"), &options_into(temp_dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::SourceUnreadable { .. }));
    }

    #[tokio::test]
    async fn test_rerun_is_stable_and_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "data.bin", 1000).await;
        let cascade = StrategyCascade::new(Category::Archive, &["bin"], Arc::new(BackendProbe::offline()))
            .with_backend(FixedSizeBackend::new("shrinks", 300));
        let options = options_into(temp_dir.path());

        let first = cascade.execute(&source, &options).await.unwrap();
        let second = cascade.execute(&source, &options).await.unwrap();
        assert_eq!(first.size, second.size);
        assert_ne!(first.path, second.path);
        assert_eq!(second.path.file_name().unwrap(), "compressed_data_1.bin");
    }

    #[tokio::test]
    async fn test_work_directory_is_cleaned_up() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_file(temp_dir.path(), "data.bin", 100).await;
        let cascade = StrategyCascade::new(Category::Archive, &["bin"], Arc::new(BackendProbe::offline()))
            .with_backend(FixedSizeBackend::new("shrinks", 10));
        cascade.execute(&source, &options_into(temp_dir.path())).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".fc-work-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
