use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::db::{backup_path, StoreError};
use crate::models::{validate_preferences, Preferences};

/// Preferences persisted as one JSON object
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored preferences with defaults for missing fields.
    ///
    /// A missing or unreadable file yields the defaults. A field whose value
    /// does not fit is dropped on its own and the rest of the file is kept.
    pub fn load(&self) -> Preferences {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No preferences file, using defaults");
            return Preferences::default();
        }
        let raw = match crate::db::read_json::<Value>(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to read preferences, trying backup");
                match crate::db::read_json::<Value>(&backup_path(&self.path)) {
                    Ok(raw) => raw,
                    Err(_) => return Preferences::default(),
                }
            }
        };
        match raw {
            Value::Object(fields) => overlay(&Preferences::default(), &fields),
            _ => {
                tracing::warn!(path = %self.path.display(), "Preferences file is not an object, using defaults");
                Preferences::default()
            }
        }
    }

    pub fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        crate::db::write_json_atomic(&self.path, prefs)?;
        tracing::info!(path = %self.path.display(), "Preferences saved");
        Ok(())
    }

    /// Stored preferences overlaid with `overrides`, then validated.
    ///
    /// The override wins field by field, and `weights` is merged key by key.
    /// Fields that do not fit the schema are ignored individually.
    pub fn effective(&self, overrides: Option<&Value>) -> Preferences {
        let base = self.load();
        match overrides {
            Some(Value::Object(overrides)) => validate_preferences(&overlay(&base, overrides)),
            _ => validate_preferences(&base),
        }
    }

    /// Writes the defaults if no file exists. Returns whether a file was created.
    pub fn create_default_if_missing(&self) -> Result<bool, StoreError> {
        if self.path.exists() {
            return Ok(false);
        }
        self.save(&Preferences::default())?;
        Ok(true)
    }
}

/// Applies each field of `layer` onto `base`, skipping any that would not deserialize.
fn overlay(base: &Preferences, layer: &Map<String, Value>) -> Preferences {
    let mut merged = match serde_json::to_value(base) {
        Ok(Value::Object(map)) => map,
        _ => return base.clone(),
    };

    for (key, value) in layer {
        match (key.as_str(), value) {
            ("weights", Value::Object(weights)) => {
                for (weight, v) in weights {
                    try_apply(&mut merged, &format!("weights.{}", weight), |fields| {
                        if let Some(Value::Object(current)) = fields.get_mut("weights") {
                            current.insert(weight.clone(), v.clone());
                        }
                    });
                }
            }
            _ => try_apply(&mut merged, key, |fields| {
                fields.insert(key.clone(), value.clone());
            }),
        }
    }

    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|_| base.clone())
}

/// Commits `change` only if the result still deserializes as `Preferences`.
fn try_apply(merged: &mut Map<String, Value>, field: &str, change: impl FnOnce(&mut Map<String, Value>)) {
    let mut candidate = merged.clone();
    change(&mut candidate);
    match serde_json::from_value::<Preferences>(Value::Object(candidate.clone())) {
        Ok(_) => *merged = candidate,
        Err(e) => tracing::warn!(field, error = %e, "Ignoring invalid preference field"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiversifyBy;
    use serde_json::json;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> PreferencesStore {
        PreferencesStore::new(dir.path().join("config/preferences.json"))
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).load(), Preferences::default());
    }

    #[test]
    fn test_unreadable_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"temperature": 1.5, "diversify_by": "year"}"#).unwrap();

        let prefs = store.load();
        assert_eq!(prefs.temperature, 1.5);
        assert_eq!(prefs.diversify_by, Some(DiversifyBy::Year));
        assert_eq!(prefs.max_items_per_genre, 2);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let prefs = Preferences {
            temperature: 0.5,
            recency_years: 20,
            ..Preferences::default()
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load(), prefs);
    }

    #[test]
    fn test_effective_merges_weights_key_by_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let prefs = store.effective(Some(&json!({
            "weights": {"rating": 0.0},
            "temperature": 99
        })));

        // popularity 0.3 and freshness 0.4 survive, then rescale to sum 1
        assert!((prefs.weights.popularity - 0.3 / 0.7).abs() < 1e-9);
        assert!((prefs.weights.freshness - 0.4 / 0.7).abs() < 1e-9);
        assert_eq!(prefs.weights.rating, 0.0);
        assert_eq!(prefs.temperature, 10.0);
    }

    #[test]
    fn test_effective_ignores_malformed_override() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let prefs = store.effective(Some(&json!({"temperature": "hot"})));
        assert_eq!(prefs, validate_preferences(&Preferences::default()));
        assert_eq!(store.effective(None), validate_preferences(&Preferences::default()));
    }

    #[test]
    fn test_bad_field_in_file_keeps_the_others() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"temperature": "hot", "preferred_genres": [18], "exclude_adult": false}"#,
        )
        .unwrap();

        let prefs = store.load();
        assert_eq!(prefs.temperature, 3.0);
        assert_eq!(prefs.preferred_genres, BTreeSet::from([18]));
        assert!(!prefs.exclude_adult);
    }

    #[test]
    fn test_bad_override_field_keeps_the_others() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let prefs = store.effective(Some(&json!({"temperature": "hot", "recency_years": 40})));
        assert_eq!(prefs.recency_years, 40);
        assert_eq!(prefs.temperature, 3.0);

        let prefs = store.effective(Some(&json!({"weights": {"rating": "high", "popularity": 0.6}})));
        // rating keeps its default 0.3, then the three weights are rescaled
        assert!((prefs.weights.popularity - 0.6 / 1.3).abs() < 1e-9);
        assert!((prefs.weights.rating - 0.3 / 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_create_default_only_once() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let created = tokio_test::assert_ok!(store.create_default_if_missing());
        assert!(created);
        let created = tokio_test::assert_ok!(store.create_default_if_missing());
        assert!(!created);
        assert_eq!(store.load(), Preferences::default());
    }
}
