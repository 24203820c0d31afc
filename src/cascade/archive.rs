//! # Archive Cascade
//!
//! ## Container (zip, 7z):
//! 1. `7z` estrae e ricomprime (`-mx` per livello, multithread)
//! 2. Solo zip: ri-pacchettizzazione in-process con la crate `zip`
//!
//! ## Stream (gz, tgz, bz2, xz, tar):
//! Il preparatore decodifica una volta sola il payload nel workdir, poi:
//! 1. `zstd --long` sul payload decodificato (`.zst` / `.tar.zst`)
//! 2. Ricodifica xz in-process (livelli aggressivi e `Balanced`)
//! 3. Ricodifica nello stesso codec al livello richiesto (tar → gzip)
//!
//! RAR e formati sconosciuti vengono solo copiati.

use super::container::repack_zip;
use super::{run_blocking, AttemptContext, Backend, InputPreparer, PreparedInput, StrategyCascade};
use crate::args;
use crate::detect::{extension_of, Category};
use crate::error::CompressError;
use crate::level::{CompressionLevel, CompressionOptions};
use crate::params::ParameterMapper;
use crate::probe::{self, BackendProbe, Capability};
use crate::utils::path_arg;
use async_trait::async_trait;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

pub const ARCHIVE_CASCADE_EXTENSIONS: &[&str] = &[
    "zip", "7z", "rar", "tar", "gz", "tgz", "bz2", "xz", "tar.gz", "tar.bz2", "tar.xz",
];

const PAYLOAD_NAME: &str = "payload";

/// Single-stream compression wrapped around a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    Gzip,
    Bzip2,
    Xz,
    /// Uncompressed tarball
    Plain,
}

impl StreamCodec {
    pub fn for_extension(ext: &str) -> Option<Self> {
        match ext {
            "gz" | "tgz" | "tar.gz" => Some(Self::Gzip),
            "bz2" | "tar.bz2" => Some(Self::Bzip2),
            "xz" | "tar.xz" => Some(Self::Xz),
            "tar" => Some(Self::Plain),
            _ => None,
        }
    }

    fn decoder(self, input: File) -> Box<dyn Read> {
        let input = BufReader::new(input);
        match self {
            Self::Gzip => Box::new(MultiGzDecoder::new(input)),
            Self::Bzip2 => Box::new(BzDecoder::new(input)),
            Self::Xz => Box::new(XzDecoder::new(input)),
            Self::Plain => Box::new(input),
        }
    }

    /// Suffix of a re-encoded file in this codec
    fn suffix(self, tarball: bool) -> &'static str {
        match (self, tarball) {
            (Self::Gzip | Self::Plain, true) => "tar.gz",
            (Self::Gzip | Self::Plain, false) => "gz",
            (Self::Bzip2, true) => "tar.bz2",
            (Self::Bzip2, false) => "bz2",
            (Self::Xz, true) => "tar.xz",
            (Self::Xz, false) => "xz",
        }
    }
}

fn is_tarball(ext: &str) -> bool {
    matches!(ext, "tar" | "tgz" | "tar.gz" | "tar.bz2" | "tar.xz")
}

/// Stream codec of the source, if any
fn stream_codec(ctx: &AttemptContext<'_>) -> Option<StreamCodec> {
    StreamCodec::for_extension(&ctx.source_ext())
}

/// Encode `payload` into `output` with `codec` at `level`
pub fn encode_stream(codec: StreamCodec, level: u32, payload: &Path, output: &Path) -> Result<u64, CompressError> {
    let mut input = BufReader::new(File::open(payload)?);
    let output = BufWriter::new(File::create(output)?);
    let written = match codec {
        StreamCodec::Gzip | StreamCodec::Plain => {
            let mut encoder = GzEncoder::new(output, flate2::Compression::new(level.min(9)));
            let written = io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
            written
        }
        StreamCodec::Bzip2 => {
            let mut encoder = BzEncoder::new(output, bzip2::Compression::new(level.clamp(1, 9)));
            let written = io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
            written
        }
        StreamCodec::Xz => {
            let mut encoder = XzEncoder::new(output, level.min(9));
            let written = io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
            written
        }
    };
    Ok(written)
}

pub fn cascade(probe: Arc<BackendProbe>) -> StrategyCascade {
    StrategyCascade::new(Category::Archive, ARCHIVE_CASCADE_EXTENSIONS, probe)
        .with_preparer(ArchivePreparer)
        .with_backend(SevenZipRepack)
        .with_backend(ZipRepack)
        .with_backend(ZstdRecompress)
        .with_backend(XzRecode)
        .with_backend(SameCodecRecode)
}

/// Decodes stream-compressed sources once into the work directory
pub struct ArchivePreparer;

#[async_trait]
impl InputPreparer for ArchivePreparer {
    async fn prepare(
        &self,
        source: &Path,
        _options: &CompressionOptions,
        workdir: &Path,
    ) -> Result<PreparedInput, CompressError> {
        let ext = extension_of(source);
        let codec = match StreamCodec::for_extension(&ext) {
            Some(StreamCodec::Plain) | None => return Ok(PreparedInput::passthrough(source)),
            Some(codec) => codec,
        };

        let payload = workdir.join(PAYLOAD_NAME);
        let (source_path, payload_path) = (source.to_path_buf(), payload.clone());
        let size = run_blocking(move || {
            let mut decoder = codec.decoder(File::open(&source_path)?);
            let mut output = BufWriter::new(File::create(&payload_path)?);
            let size = io::copy(&mut decoder, &mut output)?;
            output.flush()?;
            Ok(size)
        })
        .await?;
        debug!("Decoded {} payload: {} bytes", ext, size);

        Ok(PreparedInput {
            path: payload,
            target_ext: ext,
            source_reusable: false,
        })
    }
}

/// `7z x` followed by `7z a` at the level's `-mx`
pub struct SevenZipRepack;

#[async_trait]
impl Backend for SevenZipRepack {
    fn id(&self) -> &'static str {
        "7z-repack"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Tool(&probe::SEVEN_ZIP))
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        matches!(ctx.source_ext().as_str(), "zip" | "7z")
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let extract_dir = ctx.workdir.join("7z-extract");
        tokio::fs::create_dir_all(&extract_dir).await?;
        ctx.runner
            .run(
                probe::SEVEN_ZIP.name,
                &args!["x", "-y", format!("-o{}", path_arg(&extract_dir)), path_arg(ctx.source)],
                ctx.timeout,
            )
            .await?;

        // 7z a runs inside the extracted tree, so the archive path must be absolute
        let output_dir = tokio::fs::canonicalize(ctx.workdir).await?;
        let output = match output.file_name() {
            Some(name) => output_dir.join(name),
            None => return Err(CompressError::invalid_output(self.id(), "output has no file name")),
        };
        let archive_type = if ctx.source_ext() == "7z" { "-t7z" } else { "-tzip" };
        let level = ParameterMapper::archive(ctx.level()).sevenzip;
        ctx.runner
            .run_in(
                probe::SEVEN_ZIP.name,
                &args!["a", archive_type, format!("-mx={}", level), "-mmt=on", path_arg(&output), "."],
                Some(&extract_dir),
                ctx.timeout,
            )
            .await?;
        Ok(())
    }
}

/// In-process zip re-pack at the level's deflate setting
pub struct ZipRepack;

#[async_trait]
impl Backend for ZipRepack {
    fn id(&self) -> &'static str {
        "zip-repack"
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        ctx.source_ext() == "zip"
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let level = ParameterMapper::archive(ctx.level()).deflate;
        let (source, output) = (ctx.source.to_path_buf(), output.to_path_buf());
        let stats = run_blocking(move || repack_zip(&source, &output, level, |_, _| None)).await?;
        debug!("Re-packed {} zip entries", stats.entries);
        Ok(())
    }
}

/// `zstd --long` over the decoded payload
pub struct ZstdRecompress;

#[async_trait]
impl Backend for ZstdRecompress {
    fn id(&self) -> &'static str {
        "zstd"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Tool(&probe::ZSTD))
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        stream_codec(ctx).is_some()
    }

    fn output_extension(&self, ctx: &AttemptContext<'_>) -> String {
        let ext = if is_tarball(&ctx.source_ext()) { "tar.zst" } else { "zst" };
        ext.to_string()
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let level = ParameterMapper::archive(ctx.level()).zstd;
        ctx.runner
            .run(
                probe::ZSTD.name,
                &args![
                    format!("-{}", level),
                    "--long=27",
                    "-T0",
                    "-q",
                    "-f",
                    path_arg(&ctx.prepared.path),
                    "-o",
                    path_arg(output)
                ],
                ctx.timeout,
            )
            .await?;
        Ok(())
    }
}

/// Re-encode the payload as xz
pub struct XzRecode;

#[async_trait]
impl Backend for XzRecode {
    fn id(&self) -> &'static str {
        "xz-recode"
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        let level = ctx.level();
        stream_codec(ctx).is_some() && (level.is_aggressive() || level == CompressionLevel::Balanced)
    }

    fn output_extension(&self, ctx: &AttemptContext<'_>) -> String {
        StreamCodec::Xz.suffix(is_tarball(&ctx.source_ext())).to_string()
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let level = ParameterMapper::archive(ctx.level()).xz;
        recode(StreamCodec::Xz, level, &ctx.prepared.path, output).await
    }
}

/// Re-encode in the source's own codec; plain tarballs become gzip
pub struct SameCodecRecode;

#[async_trait]
impl Backend for SameCodecRecode {
    fn id(&self) -> &'static str {
        "stream-recode"
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        stream_codec(ctx).is_some()
    }

    fn output_extension(&self, ctx: &AttemptContext<'_>) -> String {
        let ext = ctx.source_ext();
        match StreamCodec::for_extension(&ext) {
            // tgz stays tgz
            Some(StreamCodec::Gzip) => ext,
            Some(codec) => codec.suffix(is_tarball(&ext)).to_string(),
            None => ext,
        }
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let codec = stream_codec(ctx).ok_or_else(|| CompressError::UnsupportedFormat(ctx.source_ext()))?;
        let params = ParameterMapper::archive(ctx.level());
        let level = match codec {
            StreamCodec::Gzip | StreamCodec::Plain => params.gzip,
            StreamCodec::Bzip2 => params.bzip2,
            StreamCodec::Xz => params.xz,
        };
        recode(codec, level, &ctx.prepared.path, output).await
    }
}

async fn recode(codec: StreamCodec, level: u32, payload: &Path, output: &Path) -> Result<(), CompressError> {
    let (payload, output): (PathBuf, PathBuf) = (payload.to_path_buf(), output.to_path_buf());
    run_blocking(move || encode_stream(codec, level, &payload, &output)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::container::fixtures::write_stored_zip;
    use crate::cascade::AttemptResult;
    use tempfile::TempDir;

    fn compressible(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog\n".iter().copied().cycle().take(len).collect()
    }

    fn write_gzip_fast(path: &Path, payload: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), flate2::Compression::none());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap();
    }

    fn options(level: CompressionLevel, dir: &Path) -> CompressionOptions {
        CompressionOptions {
            output_dir: Some(dir.to_path_buf()),
            ..CompressionOptions::with_level(level)
        }
    }

    fn offline() -> StrategyCascade {
        cascade(Arc::new(BackendProbe::offline()))
    }

    #[tokio::test]
    async fn test_gzip_recoded_as_xz_when_aggressive() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("logs.txt.gz");
        write_gzip_fast(&source, &compressible(200_000));

        let output = offline()
            .execute(&source, &options(CompressionLevel::Maximum, &temp_dir.path().join("out")))
            .await
            .unwrap();

        assert_eq!(output.backend, Some("xz-recode"));
        assert_eq!(output.path.file_name().unwrap(), "compressed_logs.txt.xz");
        assert_eq!(output.attempts[0].result, AttemptResult::Unavailable);

        let mut decoded = Vec::new();
        XzDecoder::new(File::open(&output.path).unwrap()).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, compressible(200_000));
    }

    #[tokio::test]
    async fn test_plain_tar_becomes_gzip_at_best_quality() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("backup.tar");
        std::fs::write(&source, compressible(100_000)).unwrap();

        let output = offline()
            .execute(&source, &options(CompressionLevel::BestQuality, &temp_dir.path().join("out")))
            .await
            .unwrap();

        assert_eq!(output.backend, Some("stream-recode"));
        assert_eq!(output.path.file_name().unwrap(), "compressed_backup.tar.gz");
        assert!(output.attempts.iter().all(|a| a.backend != "xz-recode"));
    }

    #[tokio::test]
    async fn test_stored_zip_is_repacked() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("bundle.zip");
        write_stored_zip(&source, &[("a.txt", compressible(50_000)), ("b.txt", compressible(30_000))]);

        let output = offline()
            .execute(&source, &options(CompressionLevel::Balanced, &temp_dir.path().join("out")))
            .await
            .unwrap();

        assert_eq!(output.backend, Some("zip-repack"));
        assert_eq!(output.path.extension().unwrap(), "zip");
        assert!(output.size < output.original_size);
    }

    #[tokio::test]
    async fn test_corrupted_gzip_is_copied() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("broken.gz");
        std::fs::write(&source, b"\x1f\x8bnot really gzip at all").unwrap();

        let output = offline()
            .execute(&source, &options(CompressionLevel::Balanced, temp_dir.path()))
            .await
            .unwrap();
        assert!(output.is_copy());
        assert_eq!(output.path.file_name().unwrap(), "compressed_broken.gz");
    }

    #[tokio::test]
    async fn test_rar_is_copied() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("old.rar");
        std::fs::write(&source, b"Rar!\x1a\x07\x00payload").unwrap();

        let output = offline()
            .execute(&source, &options(CompressionLevel::Maximum, temp_dir.path()))
            .await
            .unwrap();
        assert!(output.is_copy());
        assert!(output.attempts.is_empty());
    }

    #[test]
    fn test_codec_for_extension() {
        assert_eq!(StreamCodec::for_extension("tgz"), Some(StreamCodec::Gzip));
        assert_eq!(StreamCodec::for_extension("tar.bz2"), Some(StreamCodec::Bzip2));
        assert_eq!(StreamCodec::for_extension("zip"), None);
        assert_eq!(StreamCodec::Plain.suffix(true), "tar.gz");
        assert_eq!(StreamCodec::Xz.suffix(false), "xz");
    }
}
