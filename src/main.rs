//! # File Compressor - Main Entry Point
//!
//! Punto di ingresso della CLI.
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI con `clap`
//! 2. Configura il logging (`RUST_LOG`, altrimenti INFO o DEBUG con `--verbose`)
//! 3. Carica la configurazione da file e applica i flag
//! 4. Espande gli input in una lista di file
//! 5. Avvia il batch, con progress bar o eventi JSON, e Ctrl-C per annullare
//!
//! ## Esempio di utilizzo:
//! ```bash
//! file-compressor ~/Documents/scans --level maximum --output ~/small --workers 4
//! ```

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use file_compressor::{
    file_manager::FileManager,
    json_output::{JsonConfig, JsonMessage, JsonReporter},
    optimizer::ProgressListener,
    process::ToolRunner,
    progress::{format_summary, ProgressReporter},
    tool_resolver::ToolPathResolver,
    BackendProbe, BatchRunner, CancelToken, CompressionLevel, CompressorRegistry, Config, FileOutcome,
    OutputFormat, ResizeBounds,
};

#[derive(Parser)]
#[command(name = "file-compressor")]
#[command(about = "Compress images, PDFs, documents, audio, video and archives")]
struct Args {
    /// Files or directories to compress
    #[arg(required_unless_present_any = ["list_tools", "save_config"])]
    inputs: Vec<PathBuf>,

    /// Compression level: maximum, balanced, best, custom
    #[arg(short, long)]
    level: Option<CompressionLevel>,

    /// Output directory (without a value: ~/CompressedFiles)
    #[arg(short, long, num_args = 0..=1)]
    output: Option<Option<PathBuf>>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Downscale images to fit WIDTHxHEIGHT
    #[arg(long, value_name = "WxH")]
    resize: Option<ResizeBounds>,

    /// Keep PNG images as PNG at best quality
    #[arg(long)]
    no_png_to_jpeg: bool,

    /// Keep TIFF images out of JPEG conversion
    #[arg(long)]
    no_tiff_to_jpeg: bool,

    /// Image output format: auto, keep, jpeg, png, webp
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Prefix of generated filenames
    #[arg(long)]
    prefix: Option<String>,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,

    /// Output progress and results as JSON lines
    #[arg(long)]
    json: bool,

    /// Show which external tools are available and exit
    #[arg(long)]
    list_tools: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Flags override values from the configuration file
    fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(level) = self.level {
            config.level = level;
        }
        match &self.output {
            Some(Some(dir)) => config.output_dir = Some(dir.clone()),
            Some(None) => {
                config.output_dir = Some(
                    Config::default_output_dir().ok_or_else(|| anyhow!("Cannot determine the home directory"))?,
                )
            }
            None => {}
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(resize) = self.resize {
            config.resize = Some(resize);
        }
        if self.no_png_to_jpeg {
            config.convert_png_to_jpeg = false;
        }
        if self.no_tiff_to_jpeg {
            config.convert_tiff_to_jpeg = false;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        config.json_output |= self.json;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so JSON events on stdout stay parseable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let base = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    let config = match args.apply(base) {
        Ok(config) => config,
        Err(e) => {
            if args.json {
                JsonMessage::error("Invalid configuration", Some(e.to_string())).emit();
            }
            return Err(e);
        }
    };

    if let Some(path) = &args.save_config {
        config.save_to_file(path).await?;
        info!("Configuration saved to {}", path.display());
    }

    let probe = Arc::new(BackendProbe::new(
        ToolRunner::new(ToolPathResolver::new()),
        config.probe_timeout(),
    ));

    if args.list_tools {
        for (tool, available) in probe.report().await {
            println!("{:<12} {}", tool, if available { "available" } else { "missing" });
        }
        return Ok(());
    }
    if args.inputs.is_empty() {
        return Ok(());
    }

    let files = FileManager::find_files(&args.inputs)?;
    if let Some(dir) = &config.output_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let registry = Arc::new(CompressorRegistry::new(probe));
    let mut runner = BatchRunner::new(registry).with_workers(config.workers);

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting running files finish");
            on_signal.cancel();
        }
    });

    let listener: Arc<dyn ProgressListener> = if config.json_output {
        JsonMessage::start(
            args.inputs.clone(),
            config.output_dir.clone(),
            files.len(),
            JsonConfig {
                level: config.level,
                workers: runner.workers(),
                resize: config.resize,
                output_format: config.output_format,
            },
        )
        .emit();
        Arc::new(JsonReporter)
    } else {
        info!("Compressing {} files at {} level", files.len(), config.level);
        Arc::new(ProgressReporter::new(files.len() as u64))
    };
    runner.add_listener(listener);

    let result = runner
        .run(files, config.options(), |_: &FileOutcome, _: usize, _: usize| {}, &cancel)
        .await;

    if !config.json_output {
        println!("\n{}", format_summary(&result));
    }
    if result.total_files > 0 && !result.success {
        return Err(anyhow!(result.message));
    }
    Ok(())
}
