use chrono::{Datelike, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::{sanitize_movies, Candidate, Preferences, ScoredCandidate};

/// Normalized value given to candidates without a rating
const NEUTRAL_RATING: f64 = 0.5;

/// Scores raw candidate records against the preferences, best first.
///
/// Empty input, or input where every record is filtered out, yields an empty list.
pub fn score(raw: &[Value], prefs: &Preferences) -> Vec<ScoredCandidate> {
    score_candidates(sanitize_movies(raw), prefs, Utc::now().year())
}

/// Same as `score` with a fixed reference year for the recency signal
pub fn score_at(raw: &[Value], prefs: &Preferences, current_year: i32) -> Vec<ScoredCandidate> {
    score_candidates(sanitize_movies(raw), prefs, current_year)
}

/// Scores already-sanitized candidates.
pub fn score_candidates(
    candidates: Vec<Candidate>,
    prefs: &Preferences,
    current_year: i32,
) -> Vec<ScoredCandidate> {
    let candidates: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| passes_filters(c, prefs))
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    let popularity = min_max(&candidates.iter().map(|c| c.popularity).collect::<Vec<_>>());
    let rating = normalize_ratings(&candidates);
    let recency = min_max(
        &candidates
            .iter()
            .map(|c| recency_signal(c, prefs.recency_years, current_year))
            .collect::<Vec<_>>(),
    );

    let year_counts = if prefs.temporal_balance {
        count_by_year(&candidates)
    } else {
        HashMap::new()
    };
    let max_count = year_counts.values().copied().max().unwrap_or(1).max(1);

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| {
            let weights = &prefs.weights;
            let mut score = weights.popularity * popularity[i]
                + weights.rating * rating[i]
                + weights.freshness * recency[i];

            score += genre_boost(&candidate, prefs);

            if prefs.temporal_balance {
                let count = year_counts.get(candidate.year_key()).copied().unwrap_or(1);
                score *= temporal_penalty(count, max_count, prefs.temporal_balance_strength);
            }

            ScoredCandidate { candidate, score }
        })
        .collect();

    // sort_by is stable, so equal scores keep input order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

fn passes_filters(candidate: &Candidate, prefs: &Preferences) -> bool {
    if prefs.exclude_adult && candidate.adult {
        return false;
    }
    if candidate.vote_count < prefs.min_vote_count {
        return false;
    }
    candidate.genre_ids.is_disjoint(&prefs.exclude_genres)
}

/// Min-max scales into [0, 1]. A constant signal maps to 1.0 for every entry.
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range <= f64::EPSILON {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| ((v - min) / range).clamp(0.0, 1.0)).collect()
}

/// Ratings are scaled over the rated candidates only; unrated ones sit at the neutral midpoint.
fn normalize_ratings(candidates: &[Candidate]) -> Vec<f64> {
    let rated: Vec<f64> = candidates.iter().filter_map(|c| c.vote_average).collect();
    let scaled = min_max(&rated);
    let mut scaled = scaled.into_iter();
    candidates
        .iter()
        .map(|c| match c.vote_average {
            Some(_) => scaled.next().unwrap_or(NEUTRAL_RATING),
            None => NEUTRAL_RATING,
        })
        .collect()
}

/// `exp(-age / tau)` with `tau = max(1, recency_years / 2)`; unknown dates score 0.
pub fn recency_signal(candidate: &Candidate, recency_years: u32, current_year: i32) -> f64 {
    let Some(year) = candidate.release_year() else {
        return 0.0;
    };
    let tau = (f64::from(recency_years) / 2.0).max(1.0);
    let age = f64::from((current_year - year).max(0));
    (-age / tau).exp()
}

fn genre_boost(candidate: &Candidate, prefs: &Preferences) -> f64 {
    if prefs.preferred_genres.is_empty() {
        return 0.0;
    }
    let overlap = candidate.genre_ids.intersection(&prefs.preferred_genres).count();
    prefs.genre_boost * overlap as f64 / prefs.preferred_genres.len() as f64
}

fn count_by_year(candidates: &[Candidate]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for c in candidates {
        *counts.entry(c.year_key().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Multiplier damping years that hold many candidates.
pub fn temporal_penalty(count: usize, max_count: usize, strength: f64) -> f64 {
    let max_count = max_count.max(1) as f64;
    let excess = count.saturating_sub(1) as f64;
    1.0 / (1.0 + strength.max(0.0) * excess / max_count)
}
