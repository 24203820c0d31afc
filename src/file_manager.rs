//! # File Management Module
//!
//! Discovery dei file in ingresso e piccole utilità sulle dimensioni.
//!
//! ## Responsabilità:
//! - Espansione ricorsiva delle directory passate da riga di comando
//! - Filtro sulle estensioni note al format detector
//! - Formattazione human-readable delle dimensioni
//! - Calcolo della percentuale di riduzione
//!
//! I file indicati esplicitamente vengono sempre inclusi, anche se il
//! formato non è riconosciuto: sarà il batch a riportarli come non supportati.
//! Nelle directory invece si considerano solo le estensioni note, saltando
//! file e cartelle nascosti (incluse le work directory `.fc-work-*`).

use crate::detect::{extension_of, primary_extension, Category};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

pub struct FileManager;

impl FileManager {
    /// Expand files and directories into the list of files to compress
    pub fn find_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for input in inputs {
            if input.is_file() {
                if seen.insert(input.clone()) {
                    files.push(input.clone());
                }
                continue;
            }
            if !input.is_dir() {
                return Err(anyhow!("Input path does not exist: {}", input.display()));
            }

            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !Self::is_hidden(e))
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| Self::is_supported_format(p))
                .collect();
            found.sort();
            tracing::debug!("Found {} files in {}", found.len(), input.display());

            for path in found {
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    /// Whether the detector maps the extension to a category
    pub fn is_supported_format(path: &Path) -> bool {
        let ext = extension_of(path);
        Category::from_extension(primary_extension(&ext)) != Category::Unknown
    }

    fn is_hidden(entry: &DirEntry) -> bool {
        entry.file_name().to_string_lossy().starts_with('.')
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut value = size as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", size, UNITS[0])
        } else {
            format!("{:.2} {}", value, UNITS[unit])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            (original_size as f64 - new_size as f64) / original_size as f64 * 100.0
        }
    }
}
