//! Small filesystem helpers shared by the library and the CLI.

use std::fs;
use std::path::Path;

use crate::api::ScanError;

/// Reads a whole file into a byte buffer.
///
/// # Errors
/// Returns [`ScanError::FileAccess`] carrying the path and the OS reason.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, ScanError> {
    let path = path.as_ref();
    fs::read(path).map_err(|source| ScanError::FileAccess {
        path: path.to_path_buf(),
        source,
    })
}
