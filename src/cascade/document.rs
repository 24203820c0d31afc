//! # Document Cascade
//!
//! I documenti Office moderni (OOXML: docx/pptx/xlsx, ODF: odt/ods/odp) sono
//! archivi zip. Vengono ri-pacchettizzati al livello di deflate richiesto;
//! nei livelli aggressivi ogni immagine raster contenuta passa anche dalla
//! cascade immagini, mantenendo il formato originale perché i riferimenti
//! interni al documento restino validi.
//!
//! I formati binari legacy (doc/ppt/xls) e il testo semplice vengono copiati.

use super::container::repack_zip;
use super::{run_blocking, AttemptContext, Backend, StrategyCascade};
use crate::detect::{extension_of, Category, DOCUMENT_EXTENSIONS};
use crate::error::CompressError;
use crate::level::{CompressionOptions, OutputFormat};
use crate::params::ParameterMapper;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use zip::ZipArchive;

pub const CONTAINER_DOCUMENTS: &[&str] = &["docx", "pptx", "xlsx", "odt", "ods", "odp"];
const EMBEDDED_IMAGES: &[&str] = &["png", "jpg", "jpeg"];

pub fn cascade(image_cascade: Arc<StrategyCascade>) -> StrategyCascade {
    StrategyCascade::new(Category::Document, DOCUMENT_EXTENSIONS, image_cascade.probe())
        .with_backend(OfficeRepack { images: image_cascade })
}

/// Re-pack an office container, optionally shrinking its embedded images
pub struct OfficeRepack {
    images: Arc<StrategyCascade>,
}

impl OfficeRepack {
    /// Pull embedded raster images out of the container
    fn extract_images(source: &Path, dir: &Path) -> Result<Vec<(String, PathBuf)>, CompressError> {
        std::fs::create_dir_all(dir)?;
        let mut archive = ZipArchive::new(File::open(source)?)?;
        let mut extracted = Vec::new();

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let ext = extension_of(Path::new(&name));
            if !EMBEDDED_IMAGES.contains(&ext.as_str()) {
                continue;
            }
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            let path = dir.join(format!("{}.{}", index, ext));
            std::fs::write(&path, bytes)?;
            extracted.push((name, path));
        }
        Ok(extracted)
    }

    /// Run each extracted image through the image cascade; keep only real wins
    async fn shrink_images(
        &self,
        images: Vec<(String, PathBuf)>,
        options: &CompressionOptions,
        output_dir: &Path,
    ) -> HashMap<String, Vec<u8>> {
        let embedded_options = CompressionOptions {
            output_dir: Some(output_dir.to_path_buf()),
            prefix: String::new(),
            output_format: OutputFormat::Keep,
            convert_png_to_jpeg: false,
            convert_tiff_to_jpeg: false,
            ..options.clone()
        };

        let mut replacements = HashMap::new();
        for (name, path) in images {
            match self.images.execute(&path, &embedded_options).await {
                Ok(output) if !output.is_copy() => match tokio::fs::read(&output.path).await {
                    Ok(bytes) => {
                        replacements.insert(name, bytes);
                    }
                    Err(e) => warn!("Cannot read recompressed {}: {}", name, e),
                },
                Ok(_) => debug!("Embedded image {} kept as is", name),
                Err(e) => debug!("Embedded image {} skipped: {}", name, e),
            }
        }
        replacements
    }
}

#[async_trait]
impl Backend for OfficeRepack {
    fn id(&self) -> &'static str {
        "office-repack"
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        CONTAINER_DOCUMENTS.contains(&ctx.source_ext().as_str())
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let mut replacements = HashMap::new();
        if ctx.level().is_aggressive() {
            let source = ctx.source.to_path_buf();
            let media_dir = ctx.workdir.join("embedded");
            let extract_dir = media_dir.clone();
            let images = run_blocking(move || Self::extract_images(&source, &extract_dir)).await?;
            debug!("Found {} embedded images", images.len());
            replacements = self.shrink_images(images, ctx.options, &media_dir.join("out")).await;
        }

        let level = ParameterMapper::archive(ctx.level()).deflate;
        let (source, output) = (ctx.source.to_path_buf(), output.to_path_buf());
        let stats = run_blocking(move || {
            repack_zip(&source, &output, level, |name, _| replacements.remove(name))
        })
        .await?;
        debug!(
            "Re-packed {} entries, {} images replaced",
            stats.entries, stats.transformed
        );
        Ok(())
    }
}
