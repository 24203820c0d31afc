//! # Path Resolver
//!
//! Allocazione dei path di output: `<prefix><nome>.<ext>` nella directory di
//! output, con suffisso numerico `_1`, `_2`, ... in caso di collisione.
//! Il path viene riservato creando il file con semantica create-new, quindi
//! due worker concorrenti non possono mai ricevere lo stesso nome.

use crate::detect::extension_of;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};

const MAX_SUFFIX: u32 = 10_000;

pub struct PathResolver;

impl PathResolver {
    /// File name without its (possibly compound) extension
    pub fn base_name(input_path: &Path) -> String {
        let name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let ext = extension_of(input_path);
        let cut = name.len().saturating_sub(ext.len() + 1);
        if ext.is_empty() || cut == 0 || !name.is_char_boundary(cut) {
            return name;
        }
        name[..cut].to_string()
    }

    /// Reserve a fresh output path; never returns a path that already existed
    pub async fn allocate(
        input_path: &Path,
        prefix: &str,
        output_dir: &Path,
        extension: &str,
    ) -> std::io::Result<PathBuf> {
        fs::create_dir_all(output_dir).await?;
        let base = format!("{}{}", prefix, Self::base_name(input_path));
        let file_name = |suffix: Option<u32>| match (suffix, extension.is_empty()) {
            (None, true) => base.clone(),
            (None, false) => format!("{}.{}", base, extension),
            (Some(n), true) => format!("{}_{}", base, n),
            (Some(n), false) => format!("{}_{}.{}", base, n, extension),
        };

        for attempt in 0..=MAX_SUFFIX {
            let suffix = (attempt > 0).then_some(attempt);
            let candidate = output_dir.join(file_name(suffix));
            match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("No free output name for {} in {}", base, output_dir.display()),
        ))
    }

    /// Move a finished temporary file onto its reserved path
    pub async fn publish(temp_path: &Path, reserved: &Path) -> std::io::Result<()> {
        if fs::rename(temp_path, reserved).await.is_ok() {
            return Ok(());
        }
        // Cross-device moves fall back to a copy
        fs::copy(temp_path, reserved).await?;
        let _ = fs::remove_file(temp_path).await;
        Ok(())
    }

    /// Output directory for a source: explicit one, or next to the source
    pub fn output_dir_for(input_path: &Path, output_dir: Option<&Path>) -> PathBuf {
        match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}
