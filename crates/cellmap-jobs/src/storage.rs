//! Filesystem helpers shared by the job families.
//!
//! Every output is written to a temporary file in the destination
//! directory and renamed into place, so a retried job replaces its earlier
//! output instead of leaving a partial or duplicated file behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::JobError;

/// Atomically replace `path` with `bytes`, creating parent directories.
///
/// # Errors
///
/// Returns [`JobError::Io`] if the directory, temporary file, or rename
/// fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), JobError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| JobError::io(dir, e))?;
    let mut file = NamedTempFile::new_in(dir).map_err(|e| JobError::io(dir, e))?;
    file.write_all(bytes).map_err(|e| JobError::io(path, e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| JobError::io(path, e))?;
    file.persist(path).map_err(|e| JobError::io(path, e.error))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// # Errors
///
/// Returns [`JobError::Json`] on serialization failure or
/// [`JobError::Io`] on write failure.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), JobError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| JobError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Read a JSON document.
///
/// # Errors
///
/// Returns [`JobError::Io`] or [`JobError::Json`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, JobError> {
    let text = fs::read_to_string(path).map_err(|e| JobError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| JobError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a YAML document.
///
/// # Errors
///
/// Returns [`JobError::Io`] or [`JobError::Yaml`].
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, JobError> {
    let text = fs::read_to_string(path).map_err(|e| JobError::io(path, e))?;
    serde_yaml::from_str(&text).map_err(|source| JobError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Regular files directly inside `dir`, sorted by path. A missing
/// directory yields an empty list.
///
/// # Errors
///
/// Returns [`JobError::Io`] if the directory exists but cannot be read.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, JobError> {
    list(dir, |t| t.is_file())
}

/// Subdirectories directly inside `dir`, sorted by path. A missing
/// directory yields an empty list.
///
/// # Errors
///
/// Returns [`JobError::Io`] if the directory exists but cannot be read.
pub fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, JobError> {
    list(dir, |t| t.is_dir())
}

fn list(dir: &Path, keep: impl Fn(fs::FileType) -> bool) -> Result<Vec<PathBuf>, JobError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(JobError::io(dir, e)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| JobError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| JobError::io(entry.path(), e))?;
        if keep(file_type) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}
