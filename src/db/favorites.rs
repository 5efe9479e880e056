use std::path::{Path, PathBuf};

use super::{backup_path, read_json, write_json_atomic, StoreError};
use crate::models::Candidate;

/// Favorites list persisted as a single JSON array
#[derive(Debug, Clone)]
pub struct FavoritesStore {
    path: PathBuf,
}

impl FavoritesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists saved favorites. A missing or unreadable file reads as empty.
    pub fn list(&self) -> Vec<Candidate> {
        match read_json::<Vec<Candidate>>(&self.path) {
            Ok(list) => list,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Favorites unreadable, trying backup");
                read_json::<Vec<Candidate>>(&backup_path(&self.path)).unwrap_or_default()
            }
        }
    }

    /// Adds a favorite. Saving one that is already present is a no-op.
    pub fn add(&self, movie: &Candidate) -> Result<(), StoreError> {
        let mut favorites = self.list();
        if favorites.iter().any(|f| f.id == movie.id) {
            tracing::debug!(id = movie.id, "Favorite already saved");
            return Ok(());
        }
        favorites.push(movie.clone());
        write_json_atomic(&self.path, &favorites)?;
        tracing::info!(id = movie.id, title = %movie.title, "Favorite saved");
        Ok(())
    }

    /// Removes a favorite by id. Returns whether anything was removed.
    pub fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let mut favorites = self.list();
        let before = favorites.len();
        favorites.retain(|f| f.id != id);
        if favorites.len() == before {
            return Ok(false);
        }
        write_json_atomic(&self.path, &favorites)?;
        tracing::info!(id, "Favorite removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn movie(id: i64) -> Candidate {
        Candidate::sanitize(&json!({"id": id, "title": "Fav Movie", "release_date": "2020-01-01"}))
            .unwrap()
    }

    #[test]
    fn test_favorites_add_list_remove() {
        let dir = TempDir::new().unwrap();
        let store = FavoritesStore::new(dir.path().join("favorites.json"));

        store.add(&movie(101)).unwrap();
        let favs = store.list();
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id, 101);

        store.add(&movie(101)).unwrap();
        assert_eq!(store.list().len(), 1);

        assert!(store.remove(101).unwrap());
        assert!(store.list().is_empty());
        assert!(!store.remove(9999).unwrap());
    }

    #[test]
    fn test_missing_file_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = FavoritesStore::new(dir.path().join("none.json"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");
        let store = FavoritesStore::new(&path);
        store.add(&movie(1)).unwrap();
        store.add(&movie(2)).unwrap();

        std::fs::write(&path, "[{").unwrap();
        let favs = store.list();
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id, 1);
    }
}
