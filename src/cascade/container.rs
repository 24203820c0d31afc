//! Re-packing of zip containers (plain zip archives, OOXML and ODF documents).
//!
//! Entries are copied in order into a fresh archive at the requested deflate
//! level. A `mimetype` entry (ODF, EPUB) is always written first and stored
//! uncompressed, otherwise readers refuse the file.

use crate::error::CompressError;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MIMETYPE_ENTRY: &str = "mimetype";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepackStats {
    pub entries: usize,
    /// Entries whose bytes were replaced by the transform
    pub transformed: usize,
}

/// Rewrite `source` into `output`; `transform` may return smaller bytes for an entry
pub fn repack_zip<F>(source: &Path, output: &Path, level: u32, mut transform: F) -> Result<RepackStats, CompressError>
where
    F: FnMut(&str, &[u8]) -> Option<Vec<u8>>,
{
    let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))?;
    let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
    let mut order: Vec<usize> = (0..archive.len()).collect();
    if let Some(index) = archive.index_for_name(MIMETYPE_ENTRY) {
        order.retain(|i| *i != index);
        order.insert(0, index);
    }

    let mut stats = RepackStats::default();
    let mut buffer = Vec::new();
    for index in order {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let mut options = entry_options(&name, level);
        if let Some(mode) = entry.unix_mode() {
            options = options.unix_permissions(mode);
        }

        if entry.is_dir() {
            writer.add_directory(name, options)?;
            stats.entries += 1;
            continue;
        }

        buffer.clear();
        entry.read_to_end(&mut buffer)?;
        let replaced = transform(&name, &buffer).filter(|bytes| !bytes.is_empty() && bytes.len() < buffer.len());

        writer.start_file(name.clone(), options)?;
        match replaced {
            Some(bytes) => {
                debug!("Entry {} shrunk {} -> {} bytes", name, buffer.len(), bytes.len());
                writer.write_all(&bytes)?;
                stats.transformed += 1;
            }
            None => writer.write_all(&buffer)?,
        }
        stats.entries += 1;
    }

    let mut inner = writer.finish()?;
    inner.flush()?;
    Ok(stats)
}

fn entry_options(name: &str, level: u32) -> SimpleFileOptions {
    if name == MIMETYPE_ENTRY {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(level.min(9) as i64))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Zip with highly compressible entries stored uncompressed
    pub fn write_stored_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in entries {
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    pub fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive.file_names().map(str::to_string).collect::<Vec<_>>()
    }
}
