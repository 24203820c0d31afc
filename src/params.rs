//! # Parameter Mapper
//!
//! Traduce un `CompressionLevel` nei parametri numerici concreti di ogni backend.
//!
//! Tutte le funzioni sono pure (nessun I/O) e totali: ogni combinazione
//! livello × backend restituisce un valore definito, quindi le cascade non
//! hanno mai bisogno di un ramo di default.

use crate::level::CompressionLevel;
use std::time::Duration;

/// Parameters for pngquant lossy quantization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngQuantParams {
    pub min_quality: u8,
    pub max_quality: u8,
    pub colors: u16,
}

/// Deflate effort for the in-process PNG encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngEffort {
    Best,
    Default,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebpParams {
    pub quality: u8,
    pub lossless: bool,
}

/// Ghostscript and library-side PDF knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfParams {
    pub gs_preset: &'static str,
    pub downsample_dpi: u32,
    pub raster_dpi: u32,
    pub raster_quality: u8,
    pub image_scale: f32,
    pub image_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
    Vorbis,
    Mp3,
}

impl AudioCodec {
    pub fn encoder(self) -> &'static str {
        match self {
            Self::Opus => "libopus",
            Self::Aac => "aac",
            Self::Vorbis => "libvorbis",
            Self::Mp3 => "libmp3lame",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Aac => "m4a",
            Self::Vorbis => "ogg",
            Self::Mp3 => "mp3",
        }
    }
}

/// Encoder-specific audio setting derived from the level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    /// Constant/average bitrate in kbps plus opus `-compression_level`
    Bitrate { kbps: u32, compression_level: u8 },
    /// Variable bitrate quality scale (`-q:a`)
    Vbr(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SvtAv1,
    X265,
    Vp9,
    X264,
}

impl VideoCodec {
    pub fn encoder(self) -> &'static str {
        match self {
            Self::SvtAv1 => "libsvtav1",
            Self::X265 => "libx265",
            Self::Vp9 => "libvpx-vp9",
            Self::X264 => "libx264",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Vp9 => "webm",
            Self::SvtAv1 | Self::X265 | Self::X264 => "mp4",
        }
    }
}

/// Rate control for one video encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub crf: u8,
    /// `-preset` for x264/x265/svt-av1, `-cpu-used` for vp9
    pub preset: String,
    /// `-x265-params`, only for x265
    pub extra: Option<&'static str>,
    pub audio_kbps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveParams {
    /// zip deflate level (0-9)
    pub deflate: u32,
    /// 7z `-mx`
    pub sevenzip: u8,
    pub zstd: i32,
    pub xz: u32,
    pub gzip: u32,
    pub bzip2: u32,
}

/// Pure level → parameter tables
pub struct ParameterMapper;

impl ParameterMapper {
    /// JPEG quality for mozjpeg and the library encoder
    pub fn jpeg_quality(level: CompressionLevel) -> u8 {
        match level {
            CompressionLevel::Maximum => 40,
            CompressionLevel::Balanced => 75,
            CompressionLevel::BestQuality => 92,
            CompressionLevel::Custom => level.profile().quality.clamp(30, 95),
        }
    }

    /// guetzli refuses anything under 84
    pub fn guetzli_quality(level: CompressionLevel) -> u8 {
        let q = Self::jpeg_quality(level) as u32;
        (84 + q * 16 / 100).clamp(84, 100) as u8
    }

    /// None when the level must stay lossless
    pub fn pngquant(level: CompressionLevel) -> Option<PngQuantParams> {
        match level {
            CompressionLevel::Maximum => Some(PngQuantParams { min_quality: 50, max_quality: 80, colors: 128 }),
            CompressionLevel::Balanced => Some(PngQuantParams { min_quality: 70, max_quality: 90, colors: 192 }),
            CompressionLevel::BestQuality | CompressionLevel::Custom => None,
        }
    }

    pub fn optipng_level(level: CompressionLevel) -> u8 {
        match level {
            CompressionLevel::Maximum => 7,
            CompressionLevel::Balanced | CompressionLevel::Custom => 5,
            CompressionLevel::BestQuality => 3,
        }
    }

    pub fn oxipng_level(level: CompressionLevel) -> u8 {
        match level {
            CompressionLevel::Maximum => 6,
            CompressionLevel::Balanced | CompressionLevel::Custom => 4,
            CompressionLevel::BestQuality => 2,
        }
    }

    pub fn zopfli_iterations(level: CompressionLevel) -> u32 {
        match level {
            CompressionLevel::BestQuality => 5,
            _ => 15,
        }
    }

    pub fn png_effort(level: CompressionLevel) -> PngEffort {
        match level {
            CompressionLevel::Maximum => PngEffort::Best,
            CompressionLevel::Balanced | CompressionLevel::Custom => PngEffort::Default,
            CompressionLevel::BestQuality => PngEffort::Fast,
        }
    }

    pub fn webp(level: CompressionLevel) -> WebpParams {
        match level {
            CompressionLevel::Maximum => WebpParams { quality: 60, lossless: false },
            CompressionLevel::Balanced => WebpParams { quality: 80, lossless: false },
            CompressionLevel::BestQuality => WebpParams { quality: 100, lossless: true },
            CompressionLevel::Custom => WebpParams { quality: 85, lossless: false },
        }
    }

    pub fn pdf(level: CompressionLevel) -> PdfParams {
        match level {
            CompressionLevel::Maximum => PdfParams {
                gs_preset: "/screen",
                downsample_dpi: 150,
                raster_dpi: 100,
                raster_quality: 35,
                image_scale: 0.6,
                image_quality: 40,
            },
            CompressionLevel::Balanced => PdfParams {
                gs_preset: "/ebook",
                downsample_dpi: 200,
                raster_dpi: 150,
                raster_quality: 70,
                image_scale: 0.8,
                image_quality: 75,
            },
            CompressionLevel::BestQuality => PdfParams {
                gs_preset: "/printer",
                downsample_dpi: 300,
                raster_dpi: 300,
                raster_quality: 90,
                image_scale: 0.95,
                image_quality: 90,
            },
            CompressionLevel::Custom => PdfParams {
                gs_preset: "/ebook",
                downsample_dpi: 200,
                raster_dpi: 150,
                raster_quality: 75,
                image_scale: 0.85,
                image_quality: 80,
            },
        }
    }

    pub fn audio_bitrate_kbps(level: CompressionLevel) -> u32 {
        match level {
            CompressionLevel::Maximum => 64,
            CompressionLevel::Balanced | CompressionLevel::Custom => 128,
            CompressionLevel::BestQuality => 192,
        }
    }

    pub fn audio(level: CompressionLevel, codec: AudioCodec) -> AudioQuality {
        match codec {
            AudioCodec::Opus => AudioQuality::Bitrate {
                kbps: Self::audio_bitrate_kbps(level),
                compression_level: match level {
                    CompressionLevel::Maximum => 10,
                    CompressionLevel::Balanced | CompressionLevel::Custom => 7,
                    CompressionLevel::BestQuality => 5,
                },
            },
            AudioCodec::Aac => AudioQuality::Bitrate {
                kbps: Self::audio_bitrate_kbps(level),
                compression_level: 0,
            },
            AudioCodec::Vorbis => AudioQuality::Vbr(match level {
                CompressionLevel::Maximum => 3,
                CompressionLevel::Balanced | CompressionLevel::Custom => 5,
                CompressionLevel::BestQuality => 8,
            }),
            AudioCodec::Mp3 => AudioQuality::Vbr(match level {
                CompressionLevel::Maximum => 7,
                CompressionLevel::Balanced | CompressionLevel::Custom => 4,
                CompressionLevel::BestQuality => 2,
            }),
        }
    }

    pub fn video(level: CompressionLevel, codec: VideoCodec) -> VideoParams {
        let audio_kbps = Self::audio_bitrate_kbps(level);
        match codec {
            VideoCodec::X264 | VideoCodec::X265 => {
                let (crf, preset) = match level {
                    CompressionLevel::Maximum => (28, "slow"),
                    CompressionLevel::Balanced | CompressionLevel::Custom => (23, "medium"),
                    CompressionLevel::BestQuality => (18, "slow"),
                };
                let extra = match (codec, level) {
                    (VideoCodec::X265, CompressionLevel::Maximum) => {
                        Some("aq-mode=3:aq-strength=1.0:rd=4:subme=5:merange=57")
                    }
                    (VideoCodec::X265, CompressionLevel::BestQuality) => {
                        Some("aq-mode=3:aq-strength=0.8:rd=6:subme=7")
                    }
                    (VideoCodec::X265, _) => Some("aq-mode=2:aq-strength=1.0"),
                    _ => None,
                };
                VideoParams { crf, preset: preset.to_string(), extra, audio_kbps }
            }
            VideoCodec::Vp9 => {
                let (crf, cpu_used) = match level {
                    CompressionLevel::Maximum => (40, 2),
                    CompressionLevel::Balanced | CompressionLevel::Custom => (33, 3),
                    CompressionLevel::BestQuality => (28, 1),
                };
                VideoParams { crf, preset: cpu_used.to_string(), extra: None, audio_kbps }
            }
            VideoCodec::SvtAv1 => {
                let (crf, preset) = match level {
                    CompressionLevel::Maximum => (40, 8),
                    CompressionLevel::Balanced | CompressionLevel::Custom => (32, 6),
                    CompressionLevel::BestQuality => (26, 4),
                };
                VideoParams { crf, preset: preset.to_string(), extra: None, audio_kbps }
            }
        }
    }

    pub fn archive(level: CompressionLevel) -> ArchiveParams {
        match level {
            CompressionLevel::Maximum => ArchiveParams { deflate: 9, sevenzip: 9, zstd: 19, xz: 9, gzip: 9, bzip2: 9 },
            CompressionLevel::Balanced | CompressionLevel::Custom => {
                ArchiveParams { deflate: 6, sevenzip: 7, zstd: 10, xz: 6, gzip: 6, bzip2: 6 }
            }
            CompressionLevel::BestQuality => {
                ArchiveParams { deflate: 3, sevenzip: 5, zstd: 5, xz: 6, gzip: 9, bzip2: 9 }
            }
        }
    }

    /// Backends that legitimately need longer than their category deadline
    pub fn extended_timeout(backend: &str, default: Duration) -> Duration {
        match backend {
            "guetzli" => default.max(Duration::from_secs(300)),
            "zopflipng" => default.max(Duration::from_secs(120)),
            _ => default,
        }
    }
}
