use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Relative weights of the three scoring signals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Weights {
    pub popularity: f64,
    pub rating: f64,
    pub freshness: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            popularity: 0.3,
            rating: 0.3,
            freshness: 0.4,
        }
    }
}

/// Diversity constraint applied while drawing a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiversifyBy {
    Genre,
    Year,
}

/// User preferences consumed read-only by the scorer and sampler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub weights: Weights,
    /// Added as `genre_boost * overlap / preferred_genres.len()`
    pub genre_boost: f64,
    pub temperature: f64,
    pub temporal_balance: bool,
    pub temporal_balance_strength: f64,
    #[serde(deserialize_with = "lenient_diversify_by")]
    pub diversify_by: Option<DiversifyBy>,
    pub max_items_per_genre: usize,
    pub recency_years: u32,
    pub preferred_genres: BTreeSet<i64>,
    pub exclude_genres: BTreeSet<i64>,
    pub exclude_adult: bool,
    pub min_vote_count: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            genre_boost: 0.3,
            temperature: 3.0,
            temporal_balance: true,
            temporal_balance_strength: 1.5,
            diversify_by: Some(DiversifyBy::Genre),
            max_items_per_genre: 2,
            recency_years: 10,
            preferred_genres: BTreeSet::new(),
            exclude_genres: BTreeSet::new(),
            exclude_adult: true,
            min_vote_count: 0,
        }
    }
}

/// Unknown modes such as "director" read as no constraint rather than failing the whole file.
fn lenient_diversify_by<'de, D>(deserializer: D) -> Result<Option<DiversifyBy>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::to_lowercase).as_deref() {
        Some("genre") => Some(DiversifyBy::Genre),
        Some("year") => Some(DiversifyBy::Year),
        _ => None,
    })
}

/// Clamps every field into its supported range and rescales the weights to sum to 1.0.
///
/// Idempotent: validating an already-valid value returns it unchanged.
pub fn validate_preferences(prefs: &Preferences) -> Preferences {
    let mut valid = prefs.clone();

    let mut weights = [
        clamp_or(prefs.weights.popularity, 0.0, 1.0, Weights::default().popularity),
        clamp_or(prefs.weights.rating, 0.0, 1.0, Weights::default().rating),
        clamp_or(prefs.weights.freshness, 0.0, 1.0, Weights::default().freshness),
    ];
    let total: f64 = weights.iter().sum();
    if total > 0.0 && (total - 1.0).abs() > 1e-9 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
    valid.weights = Weights {
        popularity: weights[0],
        rating: weights[1],
        freshness: weights[2],
    };

    valid.genre_boost = clamp_or(prefs.genre_boost, 0.0, 1.0, 0.3);
    valid.temperature = clamp_or(prefs.temperature, 0.0, 10.0, 3.0);
    valid.temporal_balance_strength = clamp_or(prefs.temporal_balance_strength, 0.0, 5.0, 1.5);
    valid.max_items_per_genre = prefs.max_items_per_genre.clamp(1, 10);
    valid.recency_years = prefs.recency_years.clamp(1, 100);
    valid
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let prefs: Preferences = serde_json::from_value(json!({"temperature": 1.0})).unwrap();
        assert_eq!(prefs.temperature, 1.0);
        assert_eq!(prefs.weights, Weights::default());
        assert!(prefs.exclude_adult);
        assert_eq!(prefs.diversify_by, Some(DiversifyBy::Genre));
    }

    #[test]
    fn test_partial_weights_keep_other_defaults() {
        let prefs: Preferences =
            serde_json::from_value(json!({"weights": {"rating": 0.9}})).unwrap();
        assert_eq!(prefs.weights.rating, 0.9);
        assert_eq!(prefs.weights.popularity, 0.3);
    }

    #[test]
    fn test_unknown_diversify_mode_reads_as_none() {
        let prefs: Preferences =
            serde_json::from_value(json!({"diversify_by": "director"})).unwrap();
        assert_eq!(prefs.diversify_by, None);
        let prefs: Preferences = serde_json::from_value(json!({"diversify_by": null})).unwrap();
        assert_eq!(prefs.diversify_by, None);
        let prefs: Preferences = serde_json::from_value(json!({"diversify_by": "Year"})).unwrap();
        assert_eq!(prefs.diversify_by, Some(DiversifyBy::Year));
    }

    #[test]
    fn test_validate_normalizes_weights() {
        let prefs = Preferences {
            weights: Weights {
                popularity: 1.0,
                rating: 1.0,
                freshness: 2.0,
            },
            ..Preferences::default()
        };
        let valid = validate_preferences(&prefs);
        let sum = valid.weights.popularity + valid.weights.rating + valid.weights.freshness;
        assert!((sum - 1.0).abs() < 1e-9);
        // freshness clamped to 1.0 before rescaling
        assert!((valid.weights.freshness - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let prefs = Preferences {
            weights: Weights {
                popularity: 0.7,
                rating: 0.1,
                freshness: 0.35,
            },
            temperature: 42.0,
            temporal_balance_strength: -1.0,
            max_items_per_genre: 0,
            recency_years: 0,
            ..Preferences::default()
        };
        let once = validate_preferences(&prefs);
        let twice = validate_preferences(&once);
        assert_eq!(once, twice);
        assert_eq!(once.temperature, 10.0);
        assert_eq!(once.temporal_balance_strength, 0.0);
        assert_eq!(once.max_items_per_genre, 1);
        assert_eq!(once.recency_years, 1);
    }

    #[test]
    fn test_validate_keeps_all_zero_weights() {
        let prefs = Preferences {
            weights: Weights {
                popularity: 0.0,
                rating: 0.0,
                freshness: 0.0,
            },
            ..Preferences::default()
        };
        let valid = validate_preferences(&prefs);
        assert_eq!(valid.weights.popularity, 0.0);
        assert_eq!(validate_preferences(&valid), valid);
    }

    proptest! {
        #[test]
        fn property_validate_is_idempotent(
            weights in (-1.0f64..3.0, -1.0f64..3.0, -1.0f64..3.0),
            genre_boost in -1.0f64..2.0,
            temperature in -5.0f64..20.0,
            strength in -2.0f64..8.0,
            max_items_per_genre in 0usize..20,
            recency_years in 0u32..200,
        ) {
            let prefs = Preferences {
                weights: Weights {
                    popularity: weights.0,
                    rating: weights.1,
                    freshness: weights.2,
                },
                genre_boost,
                temperature,
                temporal_balance_strength: strength,
                max_items_per_genre,
                recency_years,
                ..Preferences::default()
            };

            let once = validate_preferences(&prefs);
            prop_assert_eq!(&validate_preferences(&once), &once);

            let sum = once.weights.popularity + once.weights.rating + once.weights.freshness;
            prop_assert!(sum == 0.0 || (sum - 1.0).abs() < 1e-9);
            prop_assert!((0.0..=10.0).contains(&once.temperature));
            prop_assert!((1..=10).contains(&once.max_items_per_genre));
        }
    }
}
