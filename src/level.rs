//! # Compression Level & Options
//!
//! Livelli di qualità astratti e opzioni per-job.
//!
//! `CompressionLevel` è un enum immutabile: ogni variante corrisponde a un
//! `LevelProfile` fisso (qualità, aggressività, rimozione metadata, DPI di
//! riferimento). I parametri concreti di ogni backend sono derivati dal
//! `ParameterMapper` (vedi `params.rs`).
//!
//! `CompressionOptions` è lo snapshot di configurazione passato a ogni job:
//! viene condiviso in sola lettura tra i worker.

use crate::detect::Category;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Abstract quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Maximum,
    Balanced,
    BestQuality,
    Custom,
}

/// The fixed tuple behind each level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProfile {
    /// Target quality percentage
    pub quality: u8,
    /// Trade fidelity for size (format conversion, rasterization, lossy quantization)
    pub aggressive: bool,
    /// Drop metadata from outputs
    pub strip_metadata: bool,
    /// Reference DPI for document rendering
    pub dpi: u32,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 4] = [
        Self::Maximum,
        Self::Balanced,
        Self::BestQuality,
        Self::Custom,
    ];

    pub const fn profile(self) -> LevelProfile {
        match self {
            Self::Maximum => LevelProfile { quality: 30, aggressive: true, strip_metadata: true, dpi: 50 },
            Self::Balanced => LevelProfile { quality: 75, aggressive: false, strip_metadata: false, dpi: 150 },
            Self::BestQuality => LevelProfile { quality: 90, aggressive: false, strip_metadata: false, dpi: 300 },
            Self::Custom => LevelProfile { quality: 85, aggressive: false, strip_metadata: false, dpi: 200 },
        }
    }

    pub fn is_aggressive(self) -> bool {
        self.profile().aggressive
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Maximum => "maximum",
            Self::Balanced => "balanced",
            Self::BestQuality => "best_quality",
            Self::Custom => "custom",
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::Balanced
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "maximum" | "max" => Ok(Self::Maximum),
            "balanced" => Ok(Self::Balanced),
            "best" | "best_quality" | "bestquality" => Ok(Self::BestQuality),
            "custom" => Ok(Self::Custom),
            other => Err(format!("Unknown compression level: {}", other)),
        }
    }
}

/// Explicit output format override for images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Auto,
    Keep,
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    /// Extension forced by this override, if any
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Auto | Self::Keep => None,
            Self::Jpeg => Some("jpg"),
            Self::Png => Some("png"),
            Self::Webp => Some("webp"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "keep" | "original" => Ok(Self::Keep),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// Bounding box for optional image downscaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeBounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResizeBounds {
    fn default() -> Self {
        Self { max_width: 1920, max_height: 1080 }
    }
}

impl FromStr for ResizeBounds {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .to_lowercase()
            .split_once('x')
            .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
            .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got {}", s))?;
        let max_width = w.parse::<u32>().map_err(|e| format!("Invalid width {}: {}", w, e))?;
        let max_height = h.parse::<u32>().map_err(|e| format!("Invalid height {}: {}", h, e))?;
        if max_width == 0 || max_height == 0 {
            return Err("Resize bounds must be greater than zero".to_string());
        }
        Ok(Self { max_width, max_height })
    }
}

/// Per-category hard deadlines for a single backend attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub image: Duration,
    pub pdf: Duration,
    pub audio: Duration,
    pub video: Duration,
    pub archive: Duration,
    pub document: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            image: Duration::from_secs(60),
            pdf: Duration::from_secs(300),
            audio: Duration::from_secs(300),
            video: Duration::from_secs(1800),
            archive: Duration::from_secs(300),
            document: Duration::from_secs(300),
        }
    }
}

impl Timeouts {
    pub fn for_category(&self, category: Category) -> Duration {
        match category {
            Category::Image => self.image,
            Category::Pdf => self.pdf,
            Category::Audio => self.audio,
            Category::Video => self.video,
            Category::Archive => self.archive,
            Category::Document | Category::Unknown => self.document,
        }
    }
}

/// Per-job configuration snapshot
#[derive(Debug, Clone)]
pub struct CompressionOptions {
    pub level: CompressionLevel,
    /// Destination directory (None = next to each source file)
    pub output_dir: Option<PathBuf>,
    /// Prefix prepended to every generated filename
    pub prefix: String,
    pub resize: Option<ResizeBounds>,
    pub convert_png_to_jpeg: bool,
    pub convert_tiff_to_jpeg: bool,
    pub output_format: OutputFormat,
    pub timeouts: Timeouts,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            level: CompressionLevel::default(),
            output_dir: None,
            prefix: "compressed_".to_string(),
            resize: None,
            convert_png_to_jpeg: true,
            convert_tiff_to_jpeg: true,
            output_format: OutputFormat::Auto,
            timeouts: Timeouts::default(),
        }
    }
}

impl CompressionOptions {
    pub fn with_level(level: CompressionLevel) -> Self {
        Self { level, ..Default::default() }
    }

    pub fn profile(&self) -> LevelProfile {
        self.level.profile()
    }
}
