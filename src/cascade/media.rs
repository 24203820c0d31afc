//! # Audio & Video Cascades
//!
//! Entrambe le categorie richiedono `ffmpeg`. Ogni codec è un backend
//! separato, condizionato alla presenza del relativo encoder nella build di
//! ffmpeg installata (`ffmpeg -hide_banner -encoders`, letto una sola volta).
//!
//! ## Ordine dei codec (dal più efficiente):
//! - **Audio**: Opus → AAC → Vorbis → MP3
//! - **Video**: SVT-AV1 → H.265 → VP9 → H.264
//!
//! ## Controllo qualità:
//! - Audio: bitrate (Opus, AAC) o scala VBR (Vorbis, MP3) per livello
//! - Video: CRF + preset per livello; l'audio viene ricodificato al bitrate
//!   del livello (AAC nei contenitori MP4, Opus in WebM)
//!
//! Se nessun encoder è disponibile o il risultato non è più piccolo,
//! la cascade copia la sorgente.

use super::{AttemptContext, Backend, StrategyCascade};
use crate::args;
use crate::detect::{Category, AUDIO_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::error::CompressError;
use crate::level::CompressionLevel;
use crate::params::{AudioCodec, AudioQuality, ParameterMapper, VideoCodec};
use crate::probe::{BackendProbe, Capability, FFMPEG};
use crate::utils::path_arg;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub const AUDIO_CODECS: [AudioCodec; 4] = [AudioCodec::Opus, AudioCodec::Aac, AudioCodec::Vorbis, AudioCodec::Mp3];
pub const VIDEO_CODECS: [VideoCodec; 4] = [VideoCodec::SvtAv1, VideoCodec::X265, VideoCodec::Vp9, VideoCodec::X264];

pub fn audio_cascade(probe: Arc<BackendProbe>) -> StrategyCascade {
    AUDIO_CODECS
        .into_iter()
        .fold(StrategyCascade::new(Category::Audio, AUDIO_EXTENSIONS, probe), |cascade, codec| {
            cascade.with_backend(FfmpegAudio { codec })
        })
}

pub fn video_cascade(probe: Arc<BackendProbe>) -> StrategyCascade {
    VIDEO_CODECS
        .into_iter()
        .fold(StrategyCascade::new(Category::Video, VIDEO_EXTENSIONS, probe), |cascade, codec| {
            cascade.with_backend(FfmpegVideo { codec })
        })
}

/// Flags shared by every ffmpeg invocation
fn ffmpeg_prelude(input: &str) -> Vec<String> {
    args!["-y", "-hide_banner", "-loglevel", "error", "-i", input]
}

pub fn audio_args(codec: AudioCodec, level: CompressionLevel, strip_metadata: bool, input: &str, output: &str) -> Vec<String> {
    let mut args = ffmpeg_prelude(input);
    args.extend(args!["-vn", "-c:a", codec.encoder()]);
    match ParameterMapper::audio(level, codec) {
        AudioQuality::Bitrate { kbps, compression_level } => {
            args.extend(args!["-b:a", format!("{}k", kbps)]);
            if codec == AudioCodec::Opus {
                args.extend(args!["-compression_level", compression_level]);
            }
        }
        AudioQuality::Vbr(quality) => args.extend(args!["-q:a", quality]),
    }
    if strip_metadata {
        args.extend(args!["-map_metadata", "-1"]);
    }
    args.push(output.to_string());
    args
}

pub fn video_args(codec: VideoCodec, level: CompressionLevel, strip_metadata: bool, input: &str, output: &str) -> Vec<String> {
    let params = ParameterMapper::video(level, codec);
    let mut args = ffmpeg_prelude(input);
    args.extend(args!["-c:v", codec.encoder(), "-crf", params.crf]);

    match codec {
        VideoCodec::Vp9 => args.extend(args!["-b:v", "0", "-cpu-used", params.preset, "-row-mt", "1"]),
        _ => args.extend(args!["-preset", params.preset]),
    }
    if let Some(extra) = params.extra {
        args.extend(args!["-x265-params", extra, "-tag:v", "hvc1"]);
    }
    if codec == VideoCodec::X264 {
        args.extend(args!["-profile:v", "high"]);
    }
    if codec != VideoCodec::Vp9 {
        args.extend(args!["-pix_fmt", "yuv420p", "-movflags", "+faststart"]);
    }

    let audio_encoder = match codec {
        VideoCodec::Vp9 => AudioCodec::Opus.encoder(),
        _ => AudioCodec::Aac.encoder(),
    };
    args.extend(args!["-c:a", audio_encoder, "-b:a", format!("{}k", params.audio_kbps)]);

    if strip_metadata {
        args.extend(args!["-map_metadata", "-1"]);
    }
    args.push(output.to_string());
    args
}

pub struct FfmpegAudio {
    pub codec: AudioCodec,
}

#[async_trait]
impl Backend for FfmpegAudio {
    fn id(&self) -> &'static str {
        match self.codec {
            AudioCodec::Opus => "ffmpeg-opus",
            AudioCodec::Aac => "ffmpeg-aac",
            AudioCodec::Vorbis => "ffmpeg-vorbis",
            AudioCodec::Mp3 => "ffmpeg-mp3",
        }
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::FfmpegEncoder(self.codec.encoder()))
    }

    fn output_extension(&self, _ctx: &AttemptContext<'_>) -> String {
        self.codec.extension().to_string()
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let args = audio_args(
            self.codec,
            ctx.level(),
            ctx.options.profile().strip_metadata,
            &path_arg(&ctx.prepared.path),
            &path_arg(output),
        );
        ctx.runner.run(FFMPEG.name, &args, ctx.timeout).await?;
        Ok(())
    }
}

pub struct FfmpegVideo {
    pub codec: VideoCodec,
}

#[async_trait]
impl Backend for FfmpegVideo {
    fn id(&self) -> &'static str {
        match self.codec {
            VideoCodec::SvtAv1 => "ffmpeg-av1",
            VideoCodec::X265 => "ffmpeg-x265",
            VideoCodec::Vp9 => "ffmpeg-vp9",
            VideoCodec::X264 => "ffmpeg-x264",
        }
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::FfmpegEncoder(self.codec.encoder()))
    }

    fn output_extension(&self, _ctx: &AttemptContext<'_>) -> String {
        self.codec.extension().to_string()
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let args = video_args(
            self.codec,
            ctx.level(),
            ctx.options.profile().strip_metadata,
            &path_arg(&ctx.prepared.path),
            &path_arg(output),
        );
        ctx.runner.run(FFMPEG.name, &args, ctx.timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::AttemptResult;
    use crate::level::CompressionOptions;
    use tempfile::TempDir;

    fn position(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|a| a == flag)
    }

    #[test]
    fn test_audio_args_per_codec() {
        let opus = audio_args(AudioCodec::Opus, CompressionLevel::Maximum, true, "in.wav", "out.opus");
        assert_eq!(opus[position(&opus, "-b:a").unwrap() + 1], "64k");
        assert_eq!(opus[position(&opus, "-compression_level").unwrap() + 1], "10");
        assert!(position(&opus, "-map_metadata").is_some());
        assert_eq!(opus.last().unwrap(), "out.opus");

        let mp3 = audio_args(AudioCodec::Mp3, CompressionLevel::BestQuality, false, "in.wav", "out.mp3");
        assert_eq!(mp3[position(&mp3, "-q:a").unwrap() + 1], "2");
        assert!(position(&mp3, "-map_metadata").is_none());
        assert!(position(&mp3, "-b:a").is_none());
    }

    #[test]
    fn test_video_args_per_codec() {
        let x265 = video_args(VideoCodec::X265, CompressionLevel::Balanced, false, "in.mov", "out.mp4");
        assert_eq!(x265[position(&x265, "-crf").unwrap() + 1], "23");
        assert_eq!(x265[position(&x265, "-tag:v").unwrap() + 1], "hvc1");
        assert_eq!(x265[position(&x265, "-c:a").unwrap() + 1], "aac");

        let vp9 = video_args(VideoCodec::Vp9, CompressionLevel::Maximum, true, "in.mov", "out.webm");
        assert_eq!(vp9[position(&vp9, "-cpu-used").unwrap() + 1], "2");
        assert_eq!(vp9[position(&vp9, "-c:a").unwrap() + 1], "libopus");
        assert!(position(&vp9, "-movflags").is_none());

        let x264 = video_args(VideoCodec::X264, CompressionLevel::BestQuality, false, "in.mov", "out.mp4");
        assert_eq!(x264[position(&x264, "-preset").unwrap() + 1], "slow");
        assert_eq!(x264[position(&x264, "-profile:v").unwrap() + 1], "high");
    }

    #[test]
    fn test_codec_priority() {
        let probe = Arc::new(BackendProbe::offline());
        assert_eq!(
            video_cascade(probe.clone()).backend_ids(),
            vec!["ffmpeg-av1", "ffmpeg-x265", "ffmpeg-vp9", "ffmpeg-x264"]
        );
        assert_eq!(
            audio_cascade(probe).backend_ids(),
            vec!["ffmpeg-opus", "ffmpeg-aac", "ffmpeg-vorbis", "ffmpeg-mp3"]
        );
    }

    #[tokio::test]
    async fn test_without_ffmpeg_the_source_is_copied() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("clip.mov");
        tokio::fs::write(&source, vec![7u8; 2048]).await.unwrap();

        let options = CompressionOptions {
            output_dir: Some(temp_dir.path().join("out")),
            ..Default::default()
        };
        let output = video_cascade(Arc::new(BackendProbe::offline()))
            .execute(&source, &options)
            .await
            .unwrap();

        assert!(output.is_copy());
        assert_eq!(output.path.file_name().unwrap(), "compressed_clip.mov");
        assert_eq!(output.attempts.len(), 4);
        assert!(output.attempts.iter().all(|a| a.result == AttemptResult::Unavailable));
    }
}
