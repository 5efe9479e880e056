use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::movie::coerce_i64;
use crate::services::providers::{DiscoverClient, Genre};

/// Two-way lookup between genre ids and names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenreMap {
    by_id: BTreeMap<i64, String>,
    by_name: HashMap<String, i64>,
}

impl GenreMap {
    pub fn from_genres(genres: impl IntoIterator<Item = Genre>) -> Self {
        let mut map = Self::default();
        for genre in genres {
            let name = genre.name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            map.by_name.insert(name.to_lowercase(), genre.id);
            map.by_id.insert(genre.id, name);
        }
        map
    }

    /// Fetches the provider's genre list. Any failure yields an empty map.
    pub async fn load(client: &dyn DiscoverClient, language: &str) -> Self {
        match client.genres(language).await {
            Ok(genres) => Self::from_genres(genres),
            Err(e) => {
                tracing::warn!(error = %e, provider = client.name(), "Genre list unavailable");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn name_for(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Case-insensitive exact name lookup
    pub fn id_for(&self, name: &str) -> Option<i64> {
        self.by_name.get(&name.trim().to_lowercase()).copied()
    }

    /// Names for the ids that are known, in id order
    pub fn names_for(&self, ids: &BTreeSet<i64>) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.name_for(*id))
            .map(str::to_string)
            .collect()
    }

    pub fn genres(&self) -> Vec<Genre> {
        self.by_id
            .iter()
            .map(|(id, name)| Genre {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }
}

/// Keeps the records matching a genre, returning copies.
///
/// An id matches against `genre_ids`. A name matches case-insensitively against
/// the record's genre names (inline `genres` objects or ids resolved through `map`),
/// and failing that as a substring of the title or overview.
pub fn filter_by_genre(
    movies: &[Value],
    genre_id: Option<i64>,
    genre_name: Option<&str>,
    map: &GenreMap,
) -> Vec<Value> {
    let name = genre_name
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty());

    movies
        .iter()
        .filter(|movie| movie.is_object())
        .filter(|movie| {
            if let Some(id) = genre_id {
                if genre_ids(movie).contains(&id) {
                    return true;
                }
            }
            match &name {
                Some(name) => matches_genre_name(movie, name, map) || matches_text(movie, name),
                None => false,
            }
        })
        .cloned()
        .collect()
}

fn genre_ids(movie: &Value) -> BTreeSet<i64> {
    movie
        .get("genre_ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(coerce_i64).collect())
        .unwrap_or_default()
}

fn matches_genre_name(movie: &Value, name: &str, map: &GenreMap) -> bool {
    let inline = movie
        .get("genres")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|g| g.get("name").and_then(Value::as_str))
        .map(str::to_string);
    let mapped = map.names_for(&genre_ids(movie)).into_iter();

    inline.chain(mapped).any(|genre| {
        let genre = genre.trim().to_lowercase();
        !genre.is_empty() && (genre.contains(name) || name.contains(genre.as_str()))
    })
}

fn matches_text(movie: &Value, name: &str) -> bool {
    ["title", "original_title", "overview"]
        .iter()
        .filter_map(|key| movie.get(*key).and_then(Value::as_str))
        .any(|text| text.to_lowercase().contains(name))
}
