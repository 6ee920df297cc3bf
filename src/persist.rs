//! Atomic artifact writes.
//!
//! Cache records and compiled artifacts are written to a sibling temp file
//! and renamed into place, so readers never observe a half-written file.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{CompileError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `contents` to `path` through a temp file and a rename.
///
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CompileError::io(parent, e))?;
    }

    let temp_file = temp_path(path);
    fs::write(&temp_file, contents).map_err(|e| CompileError::io(&temp_file, e))?;
    fs::rename(&temp_file, path).map_err(|e| CompileError::io(path, e))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Writes `contents` only if the file does not already hold exactly them.
///
/// Returns true when the file was (re)written.
pub fn write_if_changed(path: &Path, contents: impl AsRef<[u8]>) -> Result<bool> {
    let contents = contents.as_ref();
    match fs::read(path) {
        Ok(existing) if existing == contents => Ok(false),
        _ => write_atomic(path, contents).map(|_| true),
    }
}
