//! # Backend Probe
//!
//! Verifica se un tool esterno (o un encoder di ffmpeg) è installato ed
//! eseguibile. Il probe lancia il comando di versione del tool con un timeout
//! breve: exit code diverso da zero, timeout o errore di spawn significano
//! "non disponibile". Il risultato viene memorizzato per tutta la durata del
//! processo, perché l'installazione di un tool non cambia durante un run.

use crate::args;
use crate::process::ToolRunner;
use crate::tool_resolver::ToolPathResolver;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// An external tool and the cheap command that proves it runs
#[derive(Debug, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub probe_args: &'static [&'static str],
}

pub const GUETZLI: ToolSpec = ToolSpec { name: "guetzli", probe_args: &["--version"] };
pub const CJPEG: ToolSpec = ToolSpec { name: "cjpeg", probe_args: &["-version"] };
pub const JPEGOPTIM: ToolSpec = ToolSpec { name: "jpegoptim", probe_args: &["--version"] };
pub const PNGQUANT: ToolSpec = ToolSpec { name: "pngquant", probe_args: &["--version"] };
pub const ZOPFLIPNG: ToolSpec = ToolSpec { name: "zopflipng", probe_args: &["-h"] };
pub const OXIPNG: ToolSpec = ToolSpec { name: "oxipng", probe_args: &["--version"] };
pub const OPTIPNG: ToolSpec = ToolSpec { name: "optipng", probe_args: &["-v"] };
pub const CWEBP: ToolSpec = ToolSpec { name: "cwebp", probe_args: &["-version"] };
pub const GHOSTSCRIPT: ToolSpec = ToolSpec { name: "gs", probe_args: &["--version"] };
pub const PDFTOPPM: ToolSpec = ToolSpec { name: "pdftoppm", probe_args: &["-v"] };
pub const FFMPEG: ToolSpec = ToolSpec { name: "ffmpeg", probe_args: &["-version"] };
pub const SEVEN_ZIP: ToolSpec = ToolSpec { name: "7z", probe_args: &["i"] };
pub const ZSTD: ToolSpec = ToolSpec { name: "zstd", probe_args: &["--version"] };

/// Every tool a cascade may reach for
pub const KNOWN_TOOLS: &[&ToolSpec] = &[
    &GUETZLI, &CJPEG, &JPEGOPTIM, &PNGQUANT, &ZOPFLIPNG, &OXIPNG, &OPTIPNG, &CWEBP,
    &GHOSTSCRIPT, &PDFTOPPM, &FFMPEG, &SEVEN_ZIP, &ZSTD,
];

const ENCODER_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// What a backend needs before it is worth attempting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Tool(&'static ToolSpec),
    /// An ffmpeg encoder such as `libx265`
    FfmpegEncoder(&'static str),
}

impl Capability {
    pub fn key(&self) -> String {
        match self {
            Self::Tool(spec) => spec.name.to_string(),
            Self::FfmpegEncoder(encoder) => format!("ffmpeg:{}", encoder),
        }
    }

    pub fn tool(&self) -> &'static ToolSpec {
        match self {
            Self::Tool(spec) => spec,
            Self::FfmpegEncoder(_) => &FFMPEG,
        }
    }
}

/// Memoized availability checks
pub struct BackendProbe {
    runner: ToolRunner,
    timeout: Duration,
    /// Skip spawning entirely; only overrides can report a tool as present
    offline: bool,
    cache: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
    encoders: OnceCell<Option<String>>,
}

impl BackendProbe {
    pub fn new(runner: ToolRunner, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            offline: false,
            cache: Mutex::new(HashMap::new()),
            encoders: OnceCell::new(),
        }
    }

    /// Process-wide probe over the system PATH
    pub fn shared() -> Arc<Self> {
        static INSTANCE: OnceLock<Arc<BackendProbe>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Arc::new(Self::new(
                    ToolRunner::new(ToolPathResolver::new()),
                    Duration::from_secs(2),
                ))
            })
            .clone()
    }

    /// A probe that reports every tool as missing without spawning anything
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::new(ToolRunner::default(), Duration::from_secs(2))
        }
    }

    /// Pin the answer for specific capabilities
    pub fn with_overrides(self, overrides: impl IntoIterator<Item = (Capability, bool)>) -> Self {
        if let Ok(mut cache) = self.cache.lock() {
            for (capability, available) in overrides {
                cache.insert(capability.key(), Arc::new(OnceCell::new_with(Some(available))));
            }
        }
        self
    }

    pub fn runner(&self) -> &ToolRunner {
        &self.runner
    }

    /// Whether the capability can be used; never fails, never blocks past the probe timeout
    pub async fn available(&self, capability: &Capability) -> bool {
        let cell = match self.cache.lock() {
            Ok(mut cache) => cache.entry(capability.key()).or_default().clone(),
            Err(_) => return false,
        };
        *cell.get_or_init(|| self.probe(capability)).await
    }

    async fn probe(&self, capability: &Capability) -> bool {
        if self.offline {
            return false;
        }
        let available = match capability {
            Capability::Tool(spec) => self.probe_tool(spec).await,
            // The listing only succeeds when ffmpeg itself runs
            Capability::FfmpegEncoder(encoder) => self.has_ffmpeg_encoder(encoder).await,
        };
        debug!("Probe {} -> {}", capability.key(), available);
        available
    }

    async fn probe_tool(&self, spec: &ToolSpec) -> bool {
        let args: Vec<String> = spec.probe_args.iter().map(|a| a.to_string()).collect();
        match self.runner.capture(spec.name, &args, self.timeout).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("{} unavailable: {}", spec.name, e);
                false
            }
        }
    }

    async fn has_ffmpeg_encoder(&self, encoder: &str) -> bool {
        let listing = self
            .encoders
            .get_or_init(|| async {
                self.runner
                    .capture(FFMPEG.name, &args!["-hide_banner", "-encoders"], ENCODER_LIST_TIMEOUT)
                    .await
                    .ok()
                    .filter(|output| output.success())
                    .map(|output| output.stdout_lossy())
            })
            .await;
        listing
            .as_deref()
            .map(|text| Self::listing_contains(text, encoder))
            .unwrap_or(false)
    }

    /// Encoder lines look like ` V....D libx264   libx264 H.264 ...`
    fn listing_contains(listing: &str, encoder: &str) -> bool {
        listing
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|name| name == encoder)
    }

    /// Availability of every known tool, in table order
    pub async fn report(&self) -> Vec<(&'static str, bool)> {
        let mut report = Vec::with_capacity(KNOWN_TOOLS.len());
        for spec in KNOWN_TOOLS {
            report.push((spec.name, self.available(&Capability::Tool(spec)).await));
        }
        report
    }
}
