//! # PDF Cascade
//!
//! 1. **Ghostscript** (`pdfwrite`) con preset e DPI di downsample per livello
//! 2. **Rasterizzazione** (solo livelli aggressivi): `pdftoppm` renderizza ogni
//!    pagina in JPEG, poi `lopdf` ricostruisce un PDF con un'immagine DCT per
//!    pagina, mantenendo la MediaBox originale
//! 3. **Ricompressione immagini** (`lopdf` + `image`): le immagini DCT e Flate
//!    a 8 bit vengono ridimensionate e ricodificate in JPEG quando il risultato
//!    è più piccolo; poi compressione degli stream
//! 4. Copia

use super::tool::ToolBackend;
use super::{run_blocking, AttemptContext, Backend, InputPreparer, PreparedInput, StrategyCascade};
use crate::args;
use crate::detect::Category;
use crate::error::CompressError;
use crate::level::CompressionOptions;
use crate::params::ParameterMapper;
use crate::probe::{self, BackendProbe, Capability};
use crate::utils::path_arg;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::debug;

const PAGE_PREFIX: &str = "page";
const HEADER_WINDOW: usize = 1024;

pub fn cascade(probe: Arc<BackendProbe>) -> StrategyCascade {
    StrategyCascade::new(Category::Pdf, &["pdf"], probe)
        .with_preparer(PdfPreparer)
        .with_backend(ToolBackend::new("ghostscript", &probe::GHOSTSCRIPT, |ctx, input, output| {
            let params = ParameterMapper::pdf(ctx.level());
            let dpi = params.downsample_dpi;
            args![
                "-sDEVICE=pdfwrite",
                "-dCompatibilityLevel=1.4",
                format!("-dPDFSETTINGS={}", params.gs_preset),
                "-dDownsampleColorImages=true",
                format!("-dColorImageResolution={}", dpi),
                "-dDownsampleGrayImages=true",
                format!("-dGrayImageResolution={}", dpi),
                "-dDownsampleMonoImages=true",
                format!("-dMonoImageResolution={}", dpi),
                "-dNOPAUSE",
                "-dQUIET",
                "-dBATCH",
                format!("-sOutputFile={}", output),
                input
            ]
        }))
        .with_backend(PdfRasterize)
        .with_backend(PdfImageRecode)
}

/// Rejects files that do not carry a PDF header
pub struct PdfPreparer;

#[async_trait]
impl InputPreparer for PdfPreparer {
    async fn prepare(
        &self,
        source: &Path,
        _options: &CompressionOptions,
        _workdir: &Path,
    ) -> Result<PreparedInput, CompressError> {
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| CompressError::unreadable(source, e))?;
        let mut header = Vec::with_capacity(HEADER_WINDOW);
        (&mut file)
            .take(HEADER_WINDOW as u64)
            .read_to_end(&mut header)
            .await
            .map_err(|e| CompressError::unreadable(source, e))?;

        if !header.windows(5).any(|w| w == b"%PDF-") {
            return Err(CompressError::undecodable(source, "missing %PDF header"));
        }
        Ok(PreparedInput::passthrough(source))
    }
}

/// Render every page to JPEG and rebuild an image-only PDF
pub struct PdfRasterize;

#[async_trait]
impl Backend for PdfRasterize {
    fn id(&self) -> &'static str {
        "pdf-rasterize"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Tool(&probe::PDFTOPPM))
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        ctx.level().is_aggressive()
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let params = ParameterMapper::pdf(ctx.level());
        let source = ctx.prepared.path.clone();
        let media_boxes = run_blocking(move || {
            let doc = Document::load(&source)?;
            let pages = doc.get_pages();
            Ok(pages.values().map(|id| media_box(&doc, *id)).collect::<Vec<_>>())
        })
        .await?;

        let render_dir = ctx.workdir.join("raster");
        tokio::fs::create_dir_all(&render_dir).await?;
        let prefix = render_dir.join(PAGE_PREFIX);
        ctx.runner
            .run(
                probe::PDFTOPPM.name,
                &args![
                    "-jpeg",
                    "-jpegopt",
                    format!("quality={}", params.raster_quality),
                    "-r",
                    params.raster_dpi,
                    path_arg(&ctx.prepared.path),
                    path_arg(&prefix)
                ],
                ctx.timeout,
            )
            .await?;

        let rendered = rendered_pages(&render_dir).await?;
        if rendered.is_empty() {
            return Err(CompressError::invalid_output(self.id(), "no pages rendered"));
        }
        debug!("Rendered {} pages at {} dpi", rendered.len(), params.raster_dpi);

        let output = output.to_path_buf();
        let dpi = params.raster_dpi as f32;
        run_blocking(move || {
            let mut pages = Vec::with_capacity(rendered.len());
            for (index, path) in rendered.iter().enumerate() {
                let jpeg = std::fs::read(path)?;
                let (width, height) = image::ImageReader::with_format(Cursor::new(&jpeg), ImageFormat::Jpeg)
                    .into_dimensions()?;
                let size = media_boxes
                    .get(index)
                    .copied()
                    .flatten()
                    .unwrap_or((width as f32 * 72.0 / dpi, height as f32 * 72.0 / dpi));
                pages.push(PageImage { jpeg, width, height, size });
            }
            let mut doc = image_document(pages)?;
            doc.compress();
            doc.save(&output)?;
            Ok(())
        })
        .await
    }
}

/// `page-1.jpg`, `page-01.jpg`, ... sorted by page number
async fn rendered_pages(dir: &Path) -> Result<Vec<PathBuf>, CompressError> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let number = name
            .strip_prefix(PAGE_PREFIX)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|rest| rest.strip_suffix(".jpg"))
            .and_then(|digits| digits.parse::<u32>().ok());
        if let Some(number) = number {
            pages.push((number, entry.path()));
        }
    }
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

/// One JPEG drawn full-page
pub struct PageImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Page size in points
    pub size: (f32, f32),
}

/// Build a PDF whose pages each show a single DCT-encoded image
pub fn image_document(pages: Vec<PageImage>) -> Result<Document, CompressError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());

    for page in pages {
        let (page_width, page_height) = page.size;
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width as i64,
                "Height" => page.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg,
        );
        let image_id = doc.add_object(image);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(page_width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(page_height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_width),
                Object::Real(page_height),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

/// MediaBox width and height in points, following inheritance through `Parent`
fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc.get_dictionary(id).ok()?;
        if let Ok(object) = dict.get(b"MediaBox") {
            let array = match object {
                Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
                other => other.as_array().ok()?,
            };
            let values: Vec<f32> = array.iter().filter_map(number).collect();
            if let [x0, y0, x1, y1] = values[..] {
                return Some(((x1 - x0).abs(), (y1 - y0).abs()));
            }
            return None;
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

/// Downscale and re-encode embedded raster images, then compress streams
pub struct PdfImageRecode;

#[async_trait]
impl Backend for PdfImageRecode {
    fn id(&self) -> &'static str {
        "pdf-image-recode"
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let params = ParameterMapper::pdf(ctx.level());
        let source = ctx.prepared.path.clone();
        let output = output.to_path_buf();

        run_blocking(move || {
            let mut doc = Document::load(&source)?;
            let mut recoded = 0usize;
            for object in doc.objects.values_mut() {
                if let Object::Stream(stream) = object {
                    if recode_image(stream, params.image_scale, params.image_quality) {
                        recoded += 1;
                    }
                }
            }
            debug!("Re-encoded {} embedded images", recoded);
            doc.compress();
            doc.save(&output)?;
            Ok(())
        })
        .await
    }
}

fn dict_name<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(name) => Some(name),
        Object::Array(items) if items.len() == 1 => items[0].as_name().ok(),
        _ => None,
    }
}

/// Replace an image stream with a smaller JPEG; untouched on any mismatch
fn recode_image(stream: &mut Stream, scale: f32, quality: u8) -> bool {
    let dict = &stream.dict;
    if dict_name(dict, b"Subtype") != Some(b"Image".as_slice()) {
        return false;
    }
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) || dict.has(b"SMask") {
        return false;
    }
    let gray = match dict_name(dict, b"ColorSpace") {
        Some(b"DeviceRGB") => false,
        Some(b"DeviceGray") => true,
        _ => return false,
    };
    let width = dict.get(b"Width").and_then(Object::as_i64).unwrap_or(0);
    let height = dict.get(b"Height").and_then(Object::as_i64).unwrap_or(0);
    let bits = dict.get(b"BitsPerComponent").and_then(Object::as_i64).unwrap_or(0);
    if width <= 0 || height <= 0 || bits != 8 {
        return false;
    }
    let (width, height) = (width as u32, height as u32);

    let decoded = match dict_name(dict, b"Filter") {
        Some(b"DCTDecode") => image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok(),
        Some(b"FlateDecode") if !dict.has(b"DecodeParms") => {
            let raw = match stream.decompressed_content() {
                Ok(raw) => raw,
                Err(_) => return false,
            };
            if gray {
                GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8)
            } else {
                RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8)
            }
        }
        _ => None,
    };
    let Some(decoded) = decoded else {
        return false;
    };

    let target_width = ((width as f32 * scale).round() as u32).max(1);
    let target_height = ((height as f32 * scale).round() as u32).max(1);
    let resized = if target_width < width {
        decoded.resize_exact(target_width, target_height, FilterType::Triangle)
    } else {
        decoded
    };
    let pixels = if gray {
        DynamicImage::ImageLuma8(resized.to_luma8())
    } else {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    };

    let mut encoded = Vec::new();
    if pixels
        .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, quality))
        .is_err()
        || encoded.len() >= stream.content.len()
    {
        return false;
    }

    stream.dict.set("Width", pixels.width() as i64);
    stream.dict.set("Height", pixels.height() as i64);
    stream.dict.set("Filter", "DCTDecode");
    stream.dict.set("BitsPerComponent", 8);
    stream.dict.remove(b"DecodeParms");
    stream.set_content(encoded);
    true
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::cascade::AttemptResult;
    use crate::level::CompressionLevel;
    use tempfile::TempDir;

    fn options(level: CompressionLevel, out: &Path) -> CompressionOptions {
        CompressionOptions {
            output_dir: Some(out.to_path_buf()),
            ..CompressionOptions::with_level(level)
        }
    }

    #[test]
    fn test_media_box_is_inherited() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! { "Type" => "Page", "Parent" => pages_id });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(612), Object::Integer(792)],
            }),
        );
        assert_eq!(media_box(&doc, page_id), Some((612.0, 792.0)));
    }

    #[tokio::test]
    async fn test_image_recode_shrinks_photo_pdf() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("scan.pdf");
        write_photo_pdf(&source);

        let cascade = cascade(Arc::new(BackendProbe::offline()));
        let output = cascade
            .execute(&source, &options(CompressionLevel::Balanced, &temp_dir.path().join("out")))
            .await
            .unwrap();

        assert_eq!(output.backend, Some("pdf-image-recode"));
        assert!(output.size < output.original_size);
        let doc = Document::load(&output.path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        // Not aggressive: the rasterizer never enters the attempt list
        assert!(output.attempts.iter().all(|a| a.backend != "pdf-rasterize"));
    }

    #[tokio::test]
    async fn test_non_pdf_is_undecodable() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("fake.pdf");
        tokio::fs::write(&source, b"just some text").await.unwrap();

        let err = cascade(Arc::new(BackendProbe::offline()))
            .execute(&source, &options(CompressionLevel::Balanced, temp_dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::Undecodable { .. }));
    }

    #[cfg(unix)]
    fn install_script(dir: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_larger_ghostscript_output_falls_through_to_rasterize() {
        use crate::process::ToolRunner;
        use crate::tool_resolver::ToolPathResolver;
        use std::time::Duration;

        let temp_dir = TempDir::new().unwrap();
        let tools = temp_dir.path().join("tools");
        std::fs::create_dir_all(&tools).unwrap();
        let rendered_page = temp_dir.path().join("rendered.jpg");
        std::fs::write(&rendered_page, noisy_jpeg(120, 90, 35)).unwrap();

        install_script(
            &tools,
            "gs",
            "for a in \"$@\"; do case \"$a\" in -sOutputFile=*) out=\"${a#-sOutputFile=}\";; esac; done\n\
             [ -n \"$out\" ] && head -c 4000000 /dev/zero > \"$out\"\nexit 0\n",
        );
        install_script(
            &tools,
            "pdftoppm",
            &format!(
                "[ \"$#\" -gt 2 ] || exit 0\nfor last; do :; done\ncp '{}' \"$last-1.jpg\"\n",
                rendered_page.display()
            ),
        );

        let source = temp_dir.path().join("report.pdf");
        write_photo_pdf(&source);

        let runner = ToolRunner::new(ToolPathResolver::with_tools_dir(&tools));
        let probe = Arc::new(BackendProbe::new(runner, Duration::from_secs(5)));
        let output = cascade(probe)
            .execute(&source, &options(CompressionLevel::Maximum, &temp_dir.path().join("out")))
            .await
            .unwrap();

        assert_eq!(output.attempts[0].backend, "ghostscript");
        assert!(matches!(output.attempts[0].result, AttemptResult::Rejected(_)));
        assert_eq!(output.backend, Some("pdf-rasterize"));
        assert!(output.size < output.original_size);
        assert_eq!(Document::load(&output.path).unwrap().get_pages().len(), 1);
    }
}
