use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::{backup_path, read_json, write_json_atomic, StoreError};
use crate::services::providers::DiscoverParams;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// One discover query, identified by a hash of its sorted parameters
    Query(String),
    /// The last successful merged aggregation
    Snapshot,
}

impl CacheKey {
    /// Derives the slot for a parameter set.
    ///
    /// `DiscoverParams` is ordered by key, so two parameter sets with the same
    /// entries hash identically regardless of insertion order.
    pub fn for_query(params: &DiscoverParams) -> Self {
        let canonical = serde_json::to_string(params).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        CacheKey::Query(hex::encode(digest))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Query(hash) => write!(f, "query_{}", hash),
            CacheKey::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// On-disk cache: one JSON file per key under a single directory.
///
/// Expiry is computed from the file modification time. Writes go through a
/// temp file and rename, and the previous value is kept as `<file>.bak` for
/// recovery when the primary file fails to parse.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Atomically stores `value` under `key`, replacing any previous entry.
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), StoreError> {
        let path = self.path_for(key);
        write_json_atomic(&path, value)?;
        tracing::debug!(key = %key, path = %path.display(), "Cache entry written");
        Ok(())
    }

    /// Returns the entry if it exists and is no older than `ttl`.
    ///
    /// A zero `ttl` always misses.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey, ttl: Duration) -> Option<T> {
        let path = self.path_for(key);
        let age = match entry_age(&path) {
            Some(age) => age,
            None => {
                tracing::debug!(key = %key, "Cache miss");
                return None;
            }
        };

        if ttl.is_zero() || age > ttl {
            tracing::debug!(key = %key, age_secs = age.as_secs(), ttl_secs = ttl.as_secs(), "Cache entry expired");
            return None;
        }

        self.load(key, &path, Some(ttl))
    }

    /// Returns the entry regardless of age. Used as a stale fallback.
    pub fn get_raw<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() && !backup_path(&path).exists() {
            return None;
        }
        self.load(key, &path, None)
    }

    /// Reads the primary file, recovering from the backup when it is corrupt.
    ///
    /// The backup is renamed over the primary, keeping its modification time,
    /// and is only served under a `ttl` if it is itself fresh enough.
    fn load<T: DeserializeOwned>(&self, key: &CacheKey, path: &Path, ttl: Option<Duration>) -> Option<T> {
        match read_json::<T>(path) {
            Ok(value) => return Some(value),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache entry unreadable, trying backup");
            }
        }

        let backup = backup_path(path);
        let value = match read_json::<T>(&backup) {
            Ok(value) => value,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Cache entry and backup both unreadable");
                return None;
            }
        };

        let fresh = match ttl {
            Some(ttl) => entry_age(&backup).is_some_and(|age| age <= ttl),
            None => true,
        };
        match fs::rename(&backup, path) {
            Ok(()) => tracing::info!(key = %key, "Recovered cache entry from backup"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to promote cache backup"),
        }

        if !fresh {
            tracing::debug!(key = %key, "Recovered cache entry is expired");
            return None;
        }
        Some(value)
    }
}

fn entry_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}
