use chrono::{Datelike, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::models::{sanitize_movies, Candidate, DiversifyBy, Preferences, ScoredCandidate};
use crate::services::scoring::score_candidates;

/// Weight floor that keeps zero-score candidates drawable
const MIN_WEIGHT: f64 = 1e-3;

/// Pool size below which the recent-exclusion filter is abandoned
const MIN_POOL_AFTER_EXCLUDE: usize = 10;

/// Year diversity allows this many picks per release year
const MAX_ITEMS_PER_YEAR: usize = 2;

/// Size of the uniform fallback pool when the weighted draw fails
const FALLBACK_TOP: usize = 10;

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Draws one candidate from a temperature-scaled softmax over the scores.
///
/// Returns `None` when nothing survives scoring. The same seed over the same
/// input always yields the same candidate.
pub fn pick_one(raw: &[Value], prefs: &Preferences, seed: Option<u64>) -> Option<Candidate> {
    pick_one_at(raw, prefs, seed, Utc::now().year())
}

pub fn pick_one_at(
    raw: &[Value],
    prefs: &Preferences,
    seed: Option<u64>,
    current_year: i32,
) -> Option<Candidate> {
    let scored = score_candidates(sanitize_movies(raw), prefs, current_year);
    if scored.is_empty() {
        return None;
    }

    let mut rng = rng_for(seed);
    let weights = softmax(&scored, prefs.temperature);
    let index = match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(&mut rng),
        Err(e) => {
            tracing::warn!(error = %e, "Weighted draw failed, choosing uniformly from top candidates");
            rng.gen_range(0..scored.len().min(FALLBACK_TOP))
        }
    };
    scored.into_iter().nth(index).map(|s| s.candidate)
}

/// `exp((score - max) / temperature)`, normalized. Non-positive temperature counts as 1.
pub fn softmax(scored: &[ScoredCandidate], temperature: f64) -> Vec<f64> {
    let temperature = if temperature > 0.0 && temperature.is_finite() {
        temperature
    } else {
        1.0
    };
    let max = scored
        .iter()
        .map(|s| s.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scored
        .iter()
        .map(|s| ((s.score - max) / temperature).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.into_iter().map(|e| e / total).collect()
    } else {
        exps
    }
}

/// Draws up to `n` distinct candidates.
///
/// `exclude_ids` is dropped from the pool unless that would leave fewer than
/// `max(n, 10)` candidates. `diversify_by` caps repeats per genre
/// (`max_items_per_genre`) or per release year (two), relaxed when the remaining
/// pool could not otherwise fill the batch.
pub fn pick_batch(
    raw: &[Value],
    n: usize,
    prefs: &Preferences,
    seed: Option<u64>,
    diversify_by: Option<DiversifyBy>,
    exclude_ids: &HashSet<i64>,
) -> Vec<Candidate> {
    pick_batch_at(raw, n, prefs, seed, diversify_by, exclude_ids, Utc::now().year())
}

pub fn pick_batch_at(
    raw: &[Value],
    n: usize,
    prefs: &Preferences,
    seed: Option<u64>,
    diversify_by: Option<DiversifyBy>,
    exclude_ids: &HashSet<i64>,
    current_year: i32,
) -> Vec<Candidate> {
    if n == 0 {
        return Vec::new();
    }

    let candidates = apply_exclusions(sanitize_movies(raw), n, exclude_ids);
    let scored = score_candidates(candidates, prefs, current_year);
    if n >= scored.len() {
        return scored.into_iter().map(|s| s.candidate).collect();
    }

    let mut rng = rng_for(seed);
    let mut tracker = DiversityTracker::new(diversify_by, prefs.max_items_per_genre);
    let mut pool: Vec<usize> = (0..scored.len()).collect();
    let mut chosen: Vec<usize> = Vec::with_capacity(n);
    let max_attempts = scored.len() * 2;
    let mut attempts = 0;

    while chosen.len() < n && !pool.is_empty() && attempts < max_attempts {
        attempts += 1;

        let weights: Vec<f64> = pool.iter().map(|&i| scored[i].score.max(MIN_WEIGHT)).collect();
        let pos = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(&mut rng),
            Err(e) => {
                tracing::warn!(error = %e, "Batch draw failed, padding by score");
                break;
            }
        };
        let index = pool.swap_remove(pos);
        let candidate = &scored[index].candidate;

        let slots_left = n - chosen.len();
        // end game: the rest of the pool is needed to fill the batch
        let relaxed = pool.len() < slots_left;
        if !relaxed && !tracker.allows(candidate) {
            tracing::debug!(id = candidate.id, "Diversity cap reached, deferring candidate");
            continue;
        }

        tracker.record(candidate);
        chosen.push(index);
    }

    if chosen.len() < n {
        let taken: HashSet<usize> = chosen.iter().copied().collect();
        let padding: Vec<usize> = (0..scored.len())
            .filter(|i| !taken.contains(i))
            .take(n - chosen.len())
            .collect();
        tracing::debug!(padded = padding.len(), "Filling batch by score order");
        chosen.extend(padding);
    }

    let mut scored: Vec<Option<ScoredCandidate>> = scored.into_iter().map(Some).collect();
    chosen
        .into_iter()
        .filter_map(|i| scored.get_mut(i).and_then(Option::take))
        .map(|s| s.candidate)
        .collect()
}

fn apply_exclusions(
    candidates: Vec<Candidate>,
    n: usize,
    exclude_ids: &HashSet<i64>,
) -> Vec<Candidate> {
    if exclude_ids.is_empty() {
        return candidates;
    }
    let remaining = candidates
        .iter()
        .filter(|c| !exclude_ids.contains(&c.id))
        .count();
    if remaining < n.max(MIN_POOL_AFTER_EXCLUDE) {
        tracing::debug!(remaining, "Too few candidates after exclusions, using full pool");
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| !exclude_ids.contains(&c.id))
        .collect()
}

/// Counts chosen items per genre id or per year bucket.
struct DiversityTracker {
    mode: Option<DiversifyBy>,
    max_per_genre: usize,
    genres: HashMap<i64, usize>,
    years: HashMap<String, usize>,
}

impl DiversityTracker {
    fn new(mode: Option<DiversifyBy>, max_per_genre: usize) -> Self {
        Self {
            mode,
            max_per_genre: max_per_genre.max(1),
            genres: HashMap::new(),
            years: HashMap::new(),
        }
    }

    fn allows(&self, candidate: &Candidate) -> bool {
        match self.mode {
            Some(DiversifyBy::Genre) => candidate
                .genre_ids
                .iter()
                .all(|g| self.genres.get(g).copied().unwrap_or(0) < self.max_per_genre),
            Some(DiversifyBy::Year) => {
                let key = candidate.year_key();
                key.is_empty() || self.years.get(key).copied().unwrap_or(0) < MAX_ITEMS_PER_YEAR
            }
            None => true,
        }
    }

    fn record(&mut self, candidate: &Candidate) {
        match self.mode {
            Some(DiversifyBy::Genre) => {
                for g in &candidate.genre_ids {
                    *self.genres.entry(*g).or_insert(0) += 1;
                }
            }
            Some(DiversifyBy::Year) => {
                let key = candidate.year_key();
                if !key.is_empty() {
                    *self.years.entry(key.to_string()).or_insert(0) += 1;
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Weights;
    use proptest::prelude::{any, prop, prop_assert, prop_assert_eq, proptest};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn movies(count: i64) -> Vec<Value> {
        (1..=count)
            .map(|i| {
                json!({
                    "id": i,
                    "title": format!("Movie {}", i),
                    "popularity": 100 - i,
                    "vote_average": 5.0 + (i % 5) as f64,
                    "release_date": format!("{}-01-01", 1990 + i),
                    "genre_ids": [i % 4 + 1]
                })
            })
            .collect()
    }

    fn ids(picked: &[Candidate]) -> Vec<i64> {
        picked.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_pick_one_same_seed_same_result() {
        let raw = movies(30);
        let prefs = Preferences::default();
        let a = pick_one(&raw, &prefs, Some(42)).unwrap();
        let b = pick_one(&raw, &prefs, Some(42)).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_pick_one_empty_is_none() {
        assert!(pick_one(&[], &Preferences::default(), Some(1)).is_none());
        let adult_only = vec![json!({"id": 1, "adult": true})];
        assert!(pick_one(&adult_only, &Preferences::default(), Some(1)).is_none());
    }

    #[test]
    fn test_low_temperature_is_greedy() {
        let raw = vec![
            json!({"id": 1, "vote_average": 1.0}),
            json!({"id": 2, "vote_average": 9.0}),
            json!({"id": 3, "vote_average": 2.0}),
        ];
        let prefs = Preferences {
            weights: Weights {
                popularity: 0.0,
                rating: 1.0,
                freshness: 0.0,
            },
            temperature: 0.01,
            temporal_balance: false,
            ..Preferences::default()
        };
        for seed in 0..20 {
            assert_eq!(pick_one(&raw, &prefs, Some(seed)).unwrap().id, 2);
        }
    }

    #[test]
    fn test_softmax_sums_to_one_and_guards_temperature() {
        let scored: Vec<ScoredCandidate> = sanitize_movies(&movies(3))
            .into_iter()
            .zip([0.9, 0.5, 0.1])
            .map(|(candidate, score)| ScoredCandidate { candidate, score })
            .collect();
        for temperature in [0.0, -2.0, 0.5, 3.0] {
            let probs = softmax(&scored, temperature);
            assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(probs[0] > probs[1] && probs[1] > probs[2]);
        }
        assert_eq!(softmax(&scored, 0.0), softmax(&scored, 1.0));
    }

    #[test]
    fn test_batch_never_exceeds_n() {
        let raw = movies(20);
        let prefs = Preferences::default();
        for seed in 0..10 {
            let batch = pick_batch(&raw, 5, &prefs, Some(seed), prefs.diversify_by, &HashSet::new());
            assert_eq!(batch.len(), 5);
            let unique: HashSet<i64> = batch.iter().map(|c| c.id).collect();
            assert_eq!(unique.len(), 5);
        }
    }

    #[test]
    fn test_batch_returns_all_when_pool_is_small() {
        let raw = movies(3);
        let batch = pick_batch(&raw, 5, &Preferences::default(), Some(1), None, &HashSet::new());
        assert_eq!(batch.len(), 3);
        assert!(pick_batch(&raw, 0, &Preferences::default(), Some(1), None, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_genre_diversity_scenario() {
        let raw: Vec<Value> = (1..=9)
            .map(|i| json!({"id": i, "popularity": 100 - i * 10, "genre_ids": [i]}))
            .collect();
        let prefs = Preferences::default();
        let batch = pick_batch(&raw, 3, &prefs, Some(42), Some(DiversifyBy::Genre), &HashSet::new());
        assert_eq!(batch.len(), 3);
        let genre_sets: HashSet<BTreeSet<i64>> = batch.iter().map(|c| c.genre_ids.clone()).collect();
        assert_eq!(genre_sets.len(), 3);
    }

    #[test]
    fn test_genre_cap_holds_when_pool_allows() {
        let mut raw: Vec<Value> = (1..=6)
            .map(|i| json!({"id": i, "popularity": 1000, "genre_ids": [1]}))
            .collect();
        raw.extend((7..=9).map(|i| json!({"id": i, "popularity": 1, "genre_ids": [i]})));
        let prefs = Preferences {
            max_items_per_genre: 1,
            ..Preferences::default()
        };
        for seed in 0..20 {
            let batch = pick_batch(&raw, 3, &prefs, Some(seed), Some(DiversifyBy::Genre), &HashSet::new());
            let action = batch.iter().filter(|c| c.genre_ids.contains(&1)).count();
            assert_eq!(batch.len(), 3);
            assert!(action <= 1, "seed {} picked {:?}", seed, ids(&batch));
        }
    }

    #[test]
    fn test_year_diversity_caps_two_per_year() {
        let mut raw: Vec<Value> = (1..=6)
            .map(|i| json!({"id": i, "popularity": 500, "release_date": "1999-01-01"}))
            .collect();
        raw.extend((7..=10).map(|i| {
            json!({"id": i, "popularity": 1, "release_date": format!("{}-01-01", 2000 + i)})
        }));
        let prefs = Preferences {
            temporal_balance: false,
            ..Preferences::default()
        };
        for seed in 0..20 {
            let batch = pick_batch(&raw, 4, &prefs, Some(seed), Some(DiversifyBy::Year), &HashSet::new());
            let same_year = batch.iter().filter(|c| c.year_key() == "1999").count();
            assert_eq!(batch.len(), 4);
            assert!(same_year <= 2, "seed {} picked {:?}", seed, ids(&batch));
        }
    }

    #[test]
    fn test_constraint_relaxes_to_fill_batch() {
        let raw: Vec<Value> = (1..=5)
            .map(|i| json!({"id": i, "genre_ids": [7]}))
            .collect();
        let prefs = Preferences {
            max_items_per_genre: 1,
            ..Preferences::default()
        };
        let batch = pick_batch(&raw, 3, &prefs, Some(3), Some(DiversifyBy::Genre), &HashSet::new());
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_exclusions_respected_when_pool_is_large() {
        let raw = movies(20);
        let exclude: HashSet<i64> = (1..=5).collect();
        for seed in 0..10 {
            let batch = pick_batch(&raw, 5, &Preferences::default(), Some(seed), None, &exclude);
            assert!(batch.iter().all(|c| !exclude.contains(&c.id)));
        }
    }

    #[test]
    fn test_exclusions_abandoned_when_pool_would_starve() {
        let raw = movies(4);
        let exclude: HashSet<i64> = (1..=4).collect();
        let batch = pick_batch(&raw, 2, &Preferences::default(), Some(9), None, &exclude);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_same_seed_same_batch() {
        let raw = movies(25);
        let prefs = Preferences::default();
        let a = pick_batch(&raw, 4, &prefs, Some(42), prefs.diversify_by, &HashSet::new());
        let b = pick_batch(&raw, 4, &prefs, Some(42), prefs.diversify_by, &HashSet::new());
        assert_eq!(ids(&a), ids(&b));
    }

    proptest! {
        #[test]
        fn property_batch_size_is_bounded(
            ids in prop::collection::vec(1i64..80, 0..40),
            n in 0usize..30,
            seed in any::<u64>(),
            by_year in any::<bool>(),
        ) {
            let raw: Vec<Value> = ids
                .iter()
                .map(|&id| json!({
                    "id": id,
                    "title": format!("Movie {}", id),
                    "popularity": id,
                    "vote_average": (id % 10) as f64,
                    "genre_ids": [id % 3, id % 5],
                    "release_date": format!("{}-05-05", 1990 + id % 4),
                }))
                .collect();
            let unique: BTreeSet<i64> = ids.iter().copied().collect();
            let diversify_by = if by_year { DiversifyBy::Year } else { DiversifyBy::Genre };

            let batch = pick_batch_at(
                &raw,
                n,
                &Preferences::default(),
                Some(seed),
                Some(diversify_by),
                &HashSet::new(),
                2024,
            );

            prop_assert_eq!(batch.len(), n.min(unique.len()));
            let picked: BTreeSet<i64> = batch.iter().map(|c| c.id).collect();
            prop_assert_eq!(picked.len(), batch.len());
            prop_assert!(picked.is_subset(&unique));
        }
    }
}
