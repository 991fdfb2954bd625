//! Load and atomically save JSON documents (token file, config file).

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

/// Read and parse a JSON document. Returns `Ok(None)` when the file does
/// not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        debug!("No file at {}", path.display());
        return Ok(None);
    }

    debug!("Loading {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| Error::filesystem(path, e))?;
    let value = serde_json::from_str(&content)?;
    Ok(Some(value))
}

/// Serialize `value` as pretty JSON and replace `path` with it atomically.
///
/// The document is written to a temporary file in the destination directory
/// and renamed over the target, so readers never observe a partial file.
pub fn save_json<T: Serialize>(path: &Path, value: &T, private: bool) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes(), private)
}

pub fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::filesystem(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::filesystem(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::filesystem(tmp.path(), e))?;

    if private {
        restrict_permissions(tmp.path()).map_err(|e| Error::filesystem(tmp.path(), e))?;
    }

    tmp.persist(path).map_err(|e| Error::filesystem(path, e.error))?;
    debug!("Saved {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Remove a file, treating a missing file as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::filesystem(path, e)),
    }
}
