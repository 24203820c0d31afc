//! # Configuration Management Module
//!
//! Configurazione del compressore, caricata da file JSON e sovrascritta
//! dai flag della riga di comando.
//!
//! ## Parametri di configurazione:
//! - `level`: livello di compressione (default: balanced)
//! - `output_dir`: directory di output (default: None = accanto al file sorgente)
//! - `workers`: numero di worker paralleli (default: core disponibili)
//! - `prefix`: prefisso dei file generati (default: "compressed_")
//! - `convert_png_to_jpeg` / `convert_tiff_to_jpeg`: conversioni di formato (default: attive)
//! - `resize`: limiti di ridimensionamento delle immagini (default: disattivato)
//! - `output_format`: formato immagine forzato (default: auto)
//! - `probe_timeout_secs`: timeout della verifica dei tool esterni (default: 2)
//! - `timeouts`: timeout per tentativo, per categoria, in secondi
//! - `json_output`: eventi JSON su stdout invece della progress bar
//!
//! La configurazione non è globale: `options()` ne produce uno snapshot
//! immutabile che viene passato al batch.
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     level: CompressionLevel::Maximum,
//!     workers: 8,
//!     ..Default::default()
//! };
//! config.validate()?;
//! let options = config.options();
//! ```

use crate::level::{CompressionLevel, CompressionOptions, OutputFormat, ResizeBounds, Timeouts};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub level: CompressionLevel,
    /// Destination directory (None = next to each source file)
    pub output_dir: Option<PathBuf>,
    /// Number of parallel workers
    pub workers: usize,
    /// Prefix of generated filenames
    pub prefix: String,
    pub convert_png_to_jpeg: bool,
    pub convert_tiff_to_jpeg: bool,
    /// Downscale images to fit these bounds
    pub resize: Option<ResizeBounds>,
    pub output_format: OutputFormat,
    /// How long a tool may take to answer its version probe
    pub probe_timeout_secs: u64,
    pub timeouts: TimeoutConfig,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
}

/// Per-attempt deadlines in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub image: u64,
    pub pdf: u64,
    pub audio: u64,
    pub video: u64,
    pub archive: u64,
    pub document: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = Timeouts::default();
        Self {
            image: defaults.image.as_secs(),
            pdf: defaults.pdf.as_secs(),
            audio: defaults.audio.as_secs(),
            video: defaults.video.as_secs(),
            archive: defaults.archive.as_secs(),
            document: defaults.document.as_secs(),
        }
    }
}

impl TimeoutConfig {
    fn as_array(&self) -> [u64; 6] {
        [self.image, self.pdf, self.audio, self.video, self.archive, self.document]
    }

    pub fn to_timeouts(self) -> Timeouts {
        Timeouts {
            image: Duration::from_secs(self.image),
            pdf: Duration::from_secs(self.pdf),
            audio: Duration::from_secs(self.audio),
            video: Duration::from_secs(self.video),
            archive: Duration::from_secs(self.archive),
            document: Duration::from_secs(self.document),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: CompressionLevel::default(),
            output_dir: None,
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            prefix: "compressed_".to_string(),
            convert_png_to_jpeg: true,
            convert_tiff_to_jpeg: true,
            resize: None,
            output_format: OutputFormat::Auto,
            probe_timeout_secs: 2,
            timeouts: TimeoutConfig::default(),
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("Number of workers must be greater than 0"));
        }
        if self.prefix.is_empty() {
            return Err(anyhow!("Output prefix must not be empty"));
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(anyhow!("Output prefix must not contain path separators"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(anyhow!("Probe timeout must be greater than 0"));
        }
        if self.timeouts.as_array().contains(&0) {
            return Err(anyhow!("Backend timeouts must be greater than 0"));
        }
        if let Some(bounds) = self.resize {
            if bounds.max_width == 0 || bounds.max_height == 0 {
                return Err(anyhow!("Resize bounds must be greater than 0"));
            }
        }
        if let Some(ref output_dir) = self.output_dir {
            if output_dir.exists() && !output_dir.is_dir() {
                return Err(anyhow!("Output path is not a directory: {}", output_dir.display()));
            }
        }
        Ok(())
    }

    /// `~/CompressedFiles`, used when an output directory is requested without a path
    pub fn default_output_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join("CompressedFiles"))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Immutable snapshot handed to the batch
    pub fn options(&self) -> CompressionOptions {
        CompressionOptions {
            level: self.level,
            output_dir: self.output_dir.clone(),
            prefix: self.prefix.clone(),
            resize: self.resize,
            convert_png_to_jpeg: self.convert_png_to_jpeg,
            convert_tiff_to_jpeg: self.convert_tiff_to_jpeg,
            output_format: self.output_format,
            timeouts: self.timeouts.to_timeouts(),
        }
    }

    /// Load configuration from file; a missing file yields the defaults
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.prefix = String::new();
        assert!(config.validate().is_err());

        config.prefix = "out/".to_string();
        assert!(config.validate().is_err());

        config.prefix = "small_".to_string();
        config.timeouts.video = 0;
        assert!(config.validate().is_err());

        config.timeouts.video = 60;
        config.resize = Some(ResizeBounds { max_width: 0, max_height: 10 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.level, CompressionLevel::Balanced);
        assert_eq!(config.prefix, "compressed_");
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.timeouts.video, 1800);
        assert!(config.workers >= 1);
        assert!(config.output_dir.is_none());
        assert!(config.convert_png_to_jpeg);
        assert!(config.convert_tiff_to_jpeg);

        let options = config.options();
        assert!(options.convert_png_to_jpeg);
        assert!(options.convert_tiff_to_jpeg);
    }

    #[test]
    fn test_options_snapshot() {
        let config = Config {
            level: CompressionLevel::Maximum,
            output_dir: Some(PathBuf::from("/tmp/out")),
            resize: Some(ResizeBounds::default()),
            timeouts: TimeoutConfig { image: 5, ..Default::default() },
            ..Default::default()
        };
        let options = config.options();
        assert_eq!(options.level, CompressionLevel::Maximum);
        assert_eq!(options.output_dir.as_deref(), Some(Path::new("/tmp/out")));
        assert_eq!(options.resize, Some(ResizeBounds { max_width: 1920, max_height: 1080 }));
        assert_eq!(options.timeouts.image, Duration::from_secs(5));
        assert_eq!(options.timeouts.pdf, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/config.json");

        let original = Config {
            level: CompressionLevel::BestQuality,
            workers: 8,
            convert_tiff_to_jpeg: false,
            output_format: OutputFormat::Webp,
            json_output: true,
            ..Default::default()
        };
        original.save_to_file(&config_path).await.unwrap();

        let loaded = Config::from_file(&config_path).await.unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_partial_and_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let missing = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(missing, Config::default());

        let partial_path = temp_dir.path().join("partial.json");
        tokio::fs::write(&partial_path, r#"{"level": "maximum", "timeouts": {"image": 10}}"#)
            .await
            .unwrap();
        let partial = Config::from_file(&partial_path).await.unwrap();
        assert_eq!(partial.level, CompressionLevel::Maximum);
        assert_eq!(partial.timeouts.image, 10);
        assert_eq!(partial.timeouts.pdf, 300);
        assert_eq!(partial.prefix, "compressed_");

        tokio::fs::write(&partial_path, r#"{"workers": 0}"#).await.unwrap();
        assert!(Config::from_file(&partial_path).await.is_err());
    }
}
