//! # Image Cascade
//!
//! Pipeline:
//! 1. Decodifica con la crate `image` (formato dedotto dal contenuto); se la
//!    sorgente non è decodificabile il file fallisce con `Undecodable`
//! 2. Normalizzazione a RGB8/RGBA8 (corregge profili colore malformati),
//!    resize opzionale mantenendo l'aspect ratio, flatten dell'alpha su
//!    bianco quando il target è JPEG
//! 3. Encoder esterni per il formato target, in ordine di resa:
//!    - **JPEG**: guetzli → mozjpeg (`cjpeg`) → jpegoptim
//!    - **PNG**: pngquant → zopflipng → oxipng → optipng
//!    - **WebP**: cwebp
//! 4. Encoder di libreria (`image`) come ultimo backend prima della copia
//!
//! ## Formato di output:
//! - override esplicito (`--format`) se presente
//! - PNG → JPEG se livello aggressivo, `Balanced`, o `convert_png_to_jpeg`
//! - TIFF → JPEG se `convert_tiff_to_jpeg`
//! - GIF/BMP/TIFF → PNG, altrimenti il formato sorgente

use super::tool::ToolBackend;
use super::{run_blocking, AttemptContext, Backend, InputPreparer, PreparedInput, StrategyCascade};
use crate::args;
use crate::detect::{extension_of, Category};
use crate::error::CompressError;
use crate::level::{CompressionLevel, CompressionOptions, OutputFormat};
use crate::params::{ParameterMapper, PngEffort};
use crate::probe::{self, BackendProbe};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const IMAGE_CASCADE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

const NORMALIZED_NAME: &str = "normalized.png";

pub fn cascade(probe: Arc<BackendProbe>) -> StrategyCascade {
    StrategyCascade::new(Category::Image, IMAGE_CASCADE_EXTENSIONS, probe)
        .with_preparer(ImagePreparer)
        // JPEG
        .with_backend(
            ToolBackend::new("guetzli", &probe::GUETZLI, |ctx, input, output| {
                args!["--quality", ParameterMapper::guetzli_quality(ctx.level()), input, output]
            })
            .when(targets_jpeg),
        )
        .with_backend(
            ToolBackend::new("mozjpeg", &probe::CJPEG, |ctx, input, output| {
                args![
                    "-quality",
                    ParameterMapper::jpeg_quality(ctx.level()),
                    "-progressive",
                    "-optimize",
                    "-outfile",
                    output,
                    input
                ]
            })
            .when(targets_jpeg),
        )
        .with_backend(
            ToolBackend::new("jpegoptim", &probe::JPEGOPTIM, |ctx, input, _output| {
                let strip = if ctx.options.profile().strip_metadata { "--strip-all" } else { "--strip-none" };
                args![
                    format!("--max={}", ParameterMapper::jpeg_quality(ctx.level())),
                    strip,
                    "--all-progressive",
                    "--stdout",
                    input
                ]
            })
            .when(|ctx| targets_jpeg(ctx) && ctx.prepared.source_reusable)
            .reading_source()
            .writing_stdout(),
        )
        // PNG
        .with_backend(
            ToolBackend::new("pngquant", &probe::PNGQUANT, |ctx, input, output| {
                let mut args = args!["--force", "--speed", "1"];
                if let Some(params) = ParameterMapper::pngquant(ctx.level()) {
                    args.extend(args![
                        "--quality",
                        format!("{}-{}", params.min_quality, params.max_quality)
                    ]);
                    if ctx.options.profile().strip_metadata {
                        args.push("--strip".to_string());
                    }
                    args.extend(args!["--output", output, params.colors, "--", input]);
                }
                args
            })
            .when(|ctx| targets_png(ctx) && ParameterMapper::pngquant(ctx.level()).is_some()),
        )
        .with_backend(
            ToolBackend::new("zopflipng", &probe::ZOPFLIPNG, |ctx, input, output| {
                args![
                    "-y",
                    "--lossy_transparent",
                    "--filters=0meb",
                    format!("--iterations={}", ParameterMapper::zopfli_iterations(ctx.level())),
                    input,
                    output
                ]
            })
            .when(targets_png),
        )
        .with_backend(
            ToolBackend::new("oxipng", &probe::OXIPNG, |ctx, input, output| {
                let strip = if ctx.options.profile().strip_metadata { "all" } else { "safe" };
                args!["-o", ParameterMapper::oxipng_level(ctx.level()), "--strip", strip, "--out", output, input]
            })
            .when(targets_png),
        )
        .with_backend(
            ToolBackend::new("optipng", &probe::OPTIPNG, |ctx, input, output| {
                let mut args = args![format!("-o{}", ParameterMapper::optipng_level(ctx.level())), "-quiet"];
                if ctx.options.profile().strip_metadata {
                    args.extend(args!["-strip", "all"]);
                }
                args.extend(args!["-out", output, input]);
                args
            })
            .when(targets_png),
        )
        // WebP
        .with_backend(
            ToolBackend::new("cwebp", &probe::CWEBP, |ctx, input, output| {
                let params = ParameterMapper::webp(ctx.level());
                let mut args = if params.lossless {
                    args!["-lossless", "-z", "9", "-m", "6"]
                } else {
                    args!["-q", params.quality, "-m", "6", "-pass", "10", "-af", "-f", "50"]
                };
                let metadata = if ctx.options.profile().strip_metadata { "none" } else { "all" };
                args.extend(args!["-metadata", metadata, input, "-o", output]);
                args
            })
            .when(|ctx| ctx.prepared.target_ext == "webp"),
        )
        .with_backend(LibraryEncoder)
}

fn targets_jpeg(ctx: &AttemptContext<'_>) -> bool {
    is_jpeg(&ctx.prepared.target_ext)
}

fn targets_png(ctx: &AttemptContext<'_>) -> bool {
    ctx.prepared.target_ext == "png"
}

fn is_jpeg(ext: &str) -> bool {
    matches!(ext, "jpg" | "jpeg")
}

/// Output extension for an image source under the given options
pub fn target_extension(source_ext: &str, options: &CompressionOptions) -> String {
    if let Some(forced) = options.output_format.extension() {
        return forced.to_string();
    }
    let source_ext = source_ext.to_lowercase();
    if options.output_format != OutputFormat::Keep {
        let aggressive = options.level.is_aggressive();
        match source_ext.as_str() {
            "png" if aggressive || options.convert_png_to_jpeg || options.level == CompressionLevel::Balanced => {
                return "jpg".to_string();
            }
            "tif" | "tiff" if options.convert_tiff_to_jpeg => return "jpg".to_string(),
            _ => {}
        }
    }
    match source_ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" => source_ext,
        _ => "png".to_string(),
    }
}

/// Decodes, normalizes and optionally resizes the source into a lossless PNG
pub struct ImagePreparer;

#[async_trait]
impl InputPreparer for ImagePreparer {
    async fn prepare(
        &self,
        source: &Path,
        options: &CompressionOptions,
        workdir: &Path,
    ) -> Result<PreparedInput, CompressError> {
        let source_ext = extension_of(source);
        let target_ext = target_extension(&source_ext, options);
        let resize = options.resize;
        let source_path = source.to_path_buf();
        let normalized = workdir.join(NORMALIZED_NAME);
        let normalized_path = normalized.clone();
        let flatten = is_jpeg(&target_ext);

        let resized = run_blocking(move || {
            let reader = ImageReader::open(&source_path)
                .and_then(|r| r.with_guessed_format())
                .map_err(|e| CompressError::unreadable(&source_path, e))?;
            let decoded = reader
                .decode()
                .map_err(|e| CompressError::undecodable(&source_path, e))?;

            let (width, height) = (decoded.width(), decoded.height());
            let mut resized = false;
            let image = match resize {
                Some(bounds) if width > bounds.max_width || height > bounds.max_height => {
                    resized = true;
                    decoded.resize(bounds.max_width, bounds.max_height, FilterType::Lanczos3)
                }
                _ => decoded,
            };

            let normalized_image = normalize(image, flatten);
            normalized_image.save_with_format(&normalized_path, ImageFormat::Png)?;
            Ok(resized)
        })
        .await?;

        let same_format = (is_jpeg(&source_ext) && is_jpeg(&target_ext)) || source_ext == target_ext;
        debug!(
            "Prepared {} as {} (resized: {})",
            source.display(),
            target_ext,
            resized
        );
        Ok(PreparedInput {
            path: normalized,
            target_ext,
            source_reusable: same_format && !resized,
        })
    }
}

/// 8-bit RGB, or RGBA when alpha survives the target format
fn normalize(image: DynamicImage, flatten_alpha: bool) -> DynamicImage {
    let has_alpha = image.color().has_alpha();
    match (has_alpha, flatten_alpha) {
        (true, true) => DynamicImage::ImageRgb8(flatten_on_white(&image)),
        (true, false) => DynamicImage::ImageRgba8(image.to_rgba8()),
        (false, _) => DynamicImage::ImageRgb8(image.to_rgb8()),
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        rgb.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    rgb
}

/// In-process encoder for the target format
pub struct LibraryEncoder;

#[async_trait]
impl Backend for LibraryEncoder {
    fn id(&self) -> &'static str {
        "image-library"
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let input: PathBuf = ctx.prepared.path.clone();
        let output = output.to_path_buf();
        let target = ctx.prepared.target_ext.clone();
        let level = ctx.level();

        run_blocking(move || {
            let image = image::open(&input)?;
            encode(&image, &target, level, &output)
        })
        .await
    }
}

/// Encode `image` as `target` at the level's quality into `output`
pub fn encode(image: &DynamicImage, target: &str, level: CompressionLevel, output: &Path) -> Result<(), CompressError> {
    let mut writer = BufWriter::new(std::fs::File::create(output)?);
    let (width, height) = (image.width(), image.height());

    match target {
        "jpg" | "jpeg" => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut writer, ParameterMapper::jpeg_quality(level))
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        }
        "webp" => {
            let rgba = image.to_rgba8();
            WebPEncoder::new_lossless(&mut writer).write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
        _ => {
            let compression = match ParameterMapper::png_effort(level) {
                PngEffort::Best => CompressionType::Best,
                PngEffort::Default => CompressionType::Default,
                PngEffort::Fast => CompressionType::Fast,
            };
            let encoder = PngEncoder::new_with_quality(&mut writer, compression, PngFilter::Adaptive);
            if image.color().has_alpha() {
                let rgba = image.to_rgba8();
                encoder.write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)?;
            } else {
                let rgb = image.to_rgb8();
                encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// Deterministic noisy picture that compresses poorly at high quality
    pub fn noisy_rgb(width: u32, height: u32) -> RgbImage {
        let mut state: u32 = 0x1234_5678;
        RgbImage::from_fn(width, height, |x, y| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let noise = (state >> 16) as u8;
            Rgb([
                (x as u8).wrapping_add(noise / 4),
                (y as u8).wrapping_add(noise / 3),
                noise,
            ])
        })
    }

    pub fn write_jpeg(path: &Path, width: u32, height: u32, quality: u8) {
        let image = image::DynamicImage::ImageRgb8(noisy_rgb(width, height));
        let mut file = std::fs::File::create(path).unwrap();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut file, quality);
        image.write_with_encoder(encoder).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::cascade::AttemptResult;
    use crate::level::ResizeBounds;
    use tempfile::TempDir;

    fn offline_cascade() -> StrategyCascade {
        cascade(Arc::new(BackendProbe::offline()))
    }

    #[test]
    fn test_target_extension_rules() {
        let balanced = CompressionOptions::with_level(CompressionLevel::Balanced);
        let best = CompressionOptions::with_level(CompressionLevel::BestQuality);
        let maximum = CompressionOptions::with_level(CompressionLevel::Maximum);

        assert_eq!(target_extension("jpeg", &balanced), "jpeg");
        assert_eq!(target_extension("png", &balanced), "jpg");
        assert_eq!(target_extension("png", &maximum), "jpg");
        assert_eq!(target_extension("png", &best), "jpg");
        assert_eq!(target_extension("tif", &best), "jpg");
        assert_eq!(target_extension("gif", &best), "png");

        let no_conversion = CompressionOptions {
            convert_png_to_jpeg: false,
            convert_tiff_to_jpeg: false,
            ..best.clone()
        };
        assert_eq!(target_extension("png", &no_conversion), "png");
        assert_eq!(target_extension("tiff", &no_conversion), "png");

        // Balanced turns PNG into JPEG even with the flag off
        let balanced_no_conversion = CompressionOptions { convert_png_to_jpeg: false, ..balanced.clone() };
        assert_eq!(target_extension("png", &balanced_no_conversion), "jpg");

        let keep = CompressionOptions { output_format: OutputFormat::Keep, ..maximum.clone() };
        assert_eq!(target_extension("png", &keep), "png");

        let forced = CompressionOptions { output_format: OutputFormat::Webp, ..balanced };
        assert_eq!(target_extension("jpg", &forced), "webp");
    }

    #[test]
    fn test_flatten_on_white() {
        let mut rgba = image::RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, image::Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, image::Rgba([10, 20, 30, 255]));
        let flat = flatten_on_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[tokio::test]
    async fn test_library_fallback_shrinks_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("photo.jpg");
        write_jpeg(&source, 160, 120, 100);

        let options = CompressionOptions {
            output_dir: Some(temp_dir.path().join("out")),
            ..CompressionOptions::with_level(CompressionLevel::Balanced)
        };
        let output = offline_cascade().execute(&source, &options).await.unwrap();

        assert_eq!(output.backend, Some("image-library"));
        assert!(output.size < output.original_size);
        assert_eq!(output.path.file_name().unwrap(), "compressed_photo.jpg");
        assert!(output
            .attempts
            .iter()
            .filter(|a| a.backend != "image-library")
            .all(|a| a.result == AttemptResult::Unavailable));
        image::open(&output.path).unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_image_is_undecodable() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("broken.jpg");
        tokio::fs::write(&source, b"\xFF\xD8\xFFthis is not really a jpeg").await.unwrap();

        let options = CompressionOptions {
            output_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let err = offline_cascade().execute(&source, &options).await.unwrap_err();
        assert!(matches!(err, CompressError::Undecodable { .. }));
        assert!(err.to_string().contains("Cannot decode"));
    }

    #[tokio::test]
    async fn test_resize_respects_bounds() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("wide.jpg");
        write_jpeg(&source, 400, 200, 100);

        let options = CompressionOptions {
            output_dir: Some(temp_dir.path().join("out")),
            resize: Some(ResizeBounds { max_width: 100, max_height: 100 }),
            ..CompressionOptions::with_level(CompressionLevel::Balanced)
        };
        let output = offline_cascade().execute(&source, &options).await.unwrap();
        let (width, height) = image::image_dimensions(&output.path).unwrap();
        assert_eq!((width, height), (100, 50));
    }

    #[tokio::test]
    async fn test_png_to_jpeg_conversion() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("graphic.png");
        DynamicImage::ImageRgb8(noisy_rgb(96, 96)).save(&source).unwrap();

        let options = CompressionOptions {
            output_dir: Some(temp_dir.path().join("out")),
            ..CompressionOptions::with_level(CompressionLevel::Maximum)
        };
        let output = offline_cascade().execute(&source, &options).await.unwrap();
        assert_eq!(output.path.extension().unwrap(), "jpg");
        assert!(output.size < output.original_size);
    }
}
