//! # Utility Functions Module
//!
//! Small helpers for building external tool command lines.

use std::path::Path;

/// Lossy string form of a path, for passing to a child process
pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Builds a `Vec<String>` argument list from mixed literals, numbers and strings.
///
/// ```rust
/// use file_compressor::args;
///
/// let crf = 23;
/// let args = args!["-crf", crf, "-preset", "medium"];
/// assert_eq!(args.len(), 4);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        vec![$(::std::string::ToString::to_string(&$item)),*]
    };
}
