pub mod cache;
pub mod favorites;

pub use cache::Cache;
pub use cache::CacheKey;
pub use favorites::FavoritesStore;

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors from the JSON file stores
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => crate::error::AppError::Storage(e),
            StoreError::Json(e) => crate::error::AppError::Serialization(e),
        }
    }
}

/// `movies.json` -> `movies.json.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes JSON so that a crash never leaves a truncated destination.
///
/// The current file (if any) is copied to its `.bak` sibling first, then the
/// new contents go to a temp file in the same directory, are flushed to disk,
/// and renamed over the destination.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let json = serde_json::to_vec_pretty(value)?;

    if path.exists() {
        if let Err(e) = fs::copy(path, backup_path(path)) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to back up file, writing anyway");
        }
    }

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(&json)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
