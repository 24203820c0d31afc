//! # Tool Path Resolver
//!
//! Finds external compression tools either in a bundled tools directory
//! (`FILE_COMPRESSOR_TOOLS_DIR`, laid out as `<dir>/<platform>/<tool>` or
//! `<dir>/<platform>/<tool>/<tool>`) or on the system PATH.

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TOOLS_DIR_ENV: &str = "FILE_COMPRESSOR_TOOLS_DIR";

/// Resolves tool names to executable paths
#[derive(Debug, Clone, Default)]
pub struct ToolPathResolver {
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    pub fn new() -> Self {
        let tools_dir = env::var_os(TOOLS_DIR_ENV)
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir());
        if let Some(ref dir) = tools_dir {
            debug!("Using bundled tools directory: {}", dir.display());
        }
        Self { tools_dir }
    }

    pub fn with_tools_dir(tools_dir: impl Into<PathBuf>) -> Self {
        Self { tools_dir: Some(tools_dir.into()) }
    }

    /// Bundled tools win over system ones
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            if let Some(bundled) = Self::bundled_tool_path(tools_dir, tool_name) {
                debug!("Using bundled tool: {} -> {}", tool_name, bundled.display());
                return Some(bundled);
            }
        }

        match which::which(tool_name) {
            Ok(path) => Some(path),
            Err(_) => {
                debug!("Tool not found: {}", tool_name);
                None
            }
        }
    }

    fn bundled_tool_path(tools_dir: &Path, tool_name: &str) -> Option<PathBuf> {
        let platform = match env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let executable = format!("{}{}", tool_name, env::consts::EXE_SUFFIX);

        [
            tools_dir.join(platform).join(&executable),
            tools_dir.join(platform).join(tool_name).join(&executable),
            tools_dir.join(&executable),
        ]
        .into_iter()
        .find(|path| path.is_file())
    }

    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_tool_is_preferred() {
        let temp_dir = TempDir::new().unwrap();
        let platform = match env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let tool_dir = temp_dir.path().join(platform);
        std::fs::create_dir_all(&tool_dir).unwrap();
        let tool = tool_dir.join(format!("fakezip{}", env::consts::EXE_SUFFIX));
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();

        let resolver = ToolPathResolver::with_tools_dir(temp_dir.path());
        assert_eq!(resolver.resolve_tool("fakezip"), Some(tool));
    }

    #[test]
    fn test_missing_tool() {
        let resolver = ToolPathResolver::default();
        assert!(!resolver.is_tool_available("definitely-not-a-real-compressor-xyz"));
    }
}
