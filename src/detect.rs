//! # Format Detection
//!
//! Determina categoria, estensione e MIME type di un file.
//! L'estensione ha la precedenza; i magic bytes vengono usati solo quando
//! l'estensione manca o non è riconosciuta.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncReadExt;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "svg"];
pub const PDF_EXTENSIONS: &[&str] = &["pdf"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "rtf", "odt", "ods", "odp",
];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "opus"];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
];
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Pdf,
    Document,
    Audio,
    Video,
    Archive,
    Unknown,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Archive => "archive",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_lowercase();
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if PDF_EXTENSIONS.contains(&ext) {
            Self::Pdf
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Self::Document
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Self::Audio
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if ARCHIVE_EXTENSIONS.contains(&ext) {
            Self::Archive
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_uppercase())
    }
}

/// What the detector learned about one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFormat {
    pub category: Category,
    /// Lowercase extension without the dot (empty when unknown)
    pub extension: String,
    pub mime: String,
}

impl DetectedFormat {
    pub fn unknown() -> Self {
        Self {
            category: Category::Unknown,
            extension: String::new(),
            mime: "application/octet-stream".to_string(),
        }
    }
}

/// Extension of a path, lowercased. Compound `.tar.gz` style names keep both parts.
pub fn extension_of(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    for compound in ["tar.gz", "tar.bz2", "tar.xz", "tar.zst"] {
        if name.ends_with(&format!(".{}", compound)) {
            return compound.to_string();
        }
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// The trailing component used for category lookups (`tar.gz` → `gz`)
pub fn primary_extension(ext: &str) -> &str {
    ext.rsplit('.').next().unwrap_or(ext)
}

pub struct FormatDetector;

impl FormatDetector {
    /// Detect the format of a file; never fails, unknown files map to `Category::Unknown`
    pub async fn detect(path: &Path) -> DetectedFormat {
        let extension = extension_of(path);
        let category = Category::from_extension(primary_extension(&extension));

        if category != Category::Unknown {
            return DetectedFormat {
                mime: Self::mime_for(&extension).to_string(),
                category,
                extension,
            };
        }

        match Self::read_magic(path).await.and_then(|magic| Self::sniff(&magic)) {
            Some(sniffed) => {
                tracing::debug!("Detected {} by content: {}", sniffed, path.display());
                DetectedFormat {
                    category: Category::from_extension(sniffed),
                    mime: Self::mime_for(sniffed).to_string(),
                    extension: sniffed.to_string(),
                }
            }
            None => DetectedFormat { extension, ..DetectedFormat::unknown() },
        }
    }

    async fn read_magic(path: &Path) -> Option<Vec<u8>> {
        let mut file = tokio::fs::File::open(path).await.ok()?;
        let mut buf = vec![0u8; 16];
        let n = file.read(&mut buf).await.ok()?;
        buf.truncate(n);
        Some(buf)
    }

    /// Extension implied by well-known magic numbers
    pub fn sniff(magic: &[u8]) -> Option<&'static str> {
        const SIGNATURES: &[(&[u8], &str)] = &[
            (&[0xFF, 0xD8, 0xFF], "jpg"),
            (&[0x89, b'P', b'N', b'G'], "png"),
            (b"GIF8", "gif"),
            (b"%PDF", "pdf"),
            (&[b'P', b'K', 0x03, 0x04], "zip"),
            (&[0x1F, 0x8B], "gz"),
            (&[b'7', b'z', 0xBC, 0xAF], "7z"),
            (b"BZh", "bz2"),
            (&[0xFD, b'7', b'z', b'X', b'Z', 0x00], "xz"),
            (b"OggS", "ogg"),
            (b"fLaC", "flac"),
            (b"ID3", "mp3"),
            (b"BM", "bmp"),
        ];

        if magic.len() >= 12 && &magic[0..4] == b"RIFF" {
            return match &magic[8..12] {
                b"WAVE" => Some("wav"),
                b"WEBP" => Some("webp"),
                b"AVI " => Some("avi"),
                _ => None,
            };
        }
        if magic.len() >= 8 && &magic[4..8] == b"ftyp" {
            return Some("mp4");
        }

        SIGNATURES
            .iter()
            .find(|(sig, _)| magic.starts_with(sig))
            .map(|(_, ext)| *ext)
    }

    pub fn mime_for(extension: &str) -> &'static str {
        match primary_extension(extension) {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            "pdf" => "application/pdf",
            "doc" => "application/msword",
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "ppt" => "application/vnd.ms-powerpoint",
            "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "xls" => "application/vnd.ms-excel",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "odt" => "application/vnd.oasis.opendocument.text",
            "ods" => "application/vnd.oasis.opendocument.spreadsheet",
            "odp" => "application/vnd.oasis.opendocument.presentation",
            "txt" => "text/plain",
            "rtf" => "application/rtf",
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "flac" => "audio/flac",
            "aac" => "audio/aac",
            "ogg" => "audio/ogg",
            "opus" => "audio/opus",
            "m4a" => "audio/mp4",
            "wma" => "audio/x-ms-wma",
            "mp4" | "m4v" => "video/mp4",
            "avi" => "video/x-msvideo",
            "mkv" => "video/x-matroska",
            "mov" => "video/quicktime",
            "wmv" => "video/x-ms-wmv",
            "flv" => "video/x-flv",
            "webm" => "video/webm",
            "mpg" | "mpeg" => "video/mpeg",
            "zip" => "application/zip",
            "rar" => "application/vnd.rar",
            "7z" => "application/x-7z-compressed",
            "tar" => "application/x-tar",
            "gz" | "tgz" => "application/gzip",
            "bz2" => "application/x-bzip2",
            "xz" => "application/x-xz",
            "zst" => "application/zstd",
            _ => "application/octet-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_category_from_extension() {
        assert_eq!(Category::from_extension("JPG"), Category::Image);
        assert_eq!(Category::from_extension("pdf"), Category::Pdf);
        assert_eq!(Category::from_extension("docx"), Category::Document);
        assert_eq!(Category::from_extension("flac"), Category::Audio);
        assert_eq!(Category::from_extension("mkv"), Category::Video);
        assert_eq!(Category::from_extension("7z"), Category::Archive);
        assert_eq!(Category::from_extension("exe"), Category::Unknown);
    }

    #[test]
    fn test_compound_extensions() {
        assert_eq!(extension_of(&PathBuf::from("/a/backup.TAR.GZ")), "tar.gz");
        assert_eq!(extension_of(&PathBuf::from("photo.jpeg")), "jpeg");
        assert_eq!(extension_of(&PathBuf::from("README")), "");
        assert_eq!(primary_extension("tar.gz"), "gz");
    }

    #[test]
    fn test_sniff() {
        assert_eq!(FormatDetector::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpg"));
        assert_eq!(FormatDetector::sniff(b"%PDF-1.7"), Some("pdf"));
        assert_eq!(FormatDetector::sniff(b"RIFF\0\0\0\0WAVEfmt "), Some("wav"));
        assert_eq!(FormatDetector::sniff(b"\0\0\0\x20ftypisom"), Some("mp4"));
        assert_eq!(FormatDetector::sniff(b"hello"), None);
    }

    #[tokio::test]
    async fn test_detect_by_content_when_extension_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan");
        tokio::fs::write(&path, b"%PDF-1.4\n%rest").await.unwrap();

        let detected = FormatDetector::detect(&path).await;
        assert_eq!(detected.category, Category::Pdf);
        assert_eq!(detected.extension, "pdf");
        assert_eq!(detected.mime, "application/pdf");
    }

    #[tokio::test]
    async fn test_detect_prefers_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        tokio::fs::write(&path, b"%PDF-not-really").await.unwrap();

        let detected = FormatDetector::detect(&path).await;
        assert_eq!(detected.category, Category::Document);
        assert_eq!(detected.mime, "text/plain");
    }

    #[tokio::test]
    async fn test_detect_missing_file_is_unknown() {
        let detected = FormatDetector::detect(Path::new("/definitely/not/here")).await;
        assert_eq!(detected.category, Category::Unknown);
    }
}
