use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// Era label used for releases before 1900
pub const CLASSIC_ERA: &str = "classic";

/// A sanitized movie record eligible for scoring and sampling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub overview: String,
    /// `YYYY-MM-DD` as delivered upstream; may be empty or malformed
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub genre_ids: BTreeSet<i64>,
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub poster_path: Option<String>,
    /// Decade label ("1990s", "classic") or empty when the year is unknown
    #[serde(default)]
    pub era_tag: String,
    /// Label of the era partition the record was fetched for
    #[serde(default)]
    pub source_era: Option<String>,
}

/// A candidate paired with its final score
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
}

impl Candidate {
    /// Coerces one loosely-typed upstream record into a `Candidate`.
    ///
    /// Returns `None` for non-objects and records without an integer-coercible id.
    /// Every other field falls back to a default instead of failing.
    pub fn sanitize(raw: &Value) -> Option<Candidate> {
        let obj = raw.as_object()?;
        let id = obj.get("id").and_then(coerce_i64)?;

        let title = ["title", "name", "original_title"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .map(value_to_string)
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Untitled ({})", id));

        let release_date = ["release_date", "first_air_date"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .map(value_to_string)
            .find(|s| !s.is_empty())
            .unwrap_or_default();

        let era_tag = obj
            .get("era_tag")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| era_label(&release_date));

        Some(Candidate {
            id,
            title,
            original_title: obj.get("original_title").map(value_to_string).unwrap_or_default(),
            overview: obj.get("overview").map(value_to_string).unwrap_or_default(),
            popularity: obj
                .get("popularity")
                .and_then(coerce_f64)
                .map(|p| p.max(0.0))
                .unwrap_or(0.0),
            vote_average: obj.get("vote_average").and_then(coerce_f64),
            vote_count: obj
                .get("vote_count")
                .and_then(coerce_i64)
                .map(|c| c.max(0) as u64)
                .unwrap_or(0),
            genre_ids: parse_genre_ids(obj.get("genre_ids").or_else(|| obj.get("genres"))),
            adult: obj.get("adult").map(is_truthy).unwrap_or(false),
            poster_path: obj
                .get("poster_path")
                .and_then(Value::as_str)
                .map(str::to_string),
            source_era: obj
                .get("source_era")
                .and_then(Value::as_str)
                .map(str::to_string),
            era_tag,
            release_date,
        })
    }

    /// Four-digit release year, if the date starts with one
    pub fn release_year(&self) -> Option<i32> {
        parse_release_year(&self.release_date)
    }

    /// First four characters of the release date, the bucket used for year balancing
    pub fn year_key(&self) -> &str {
        year_key(&self.release_date)
    }
}

/// Sanitizes a list of raw records, dropping unusable entries and repeated ids.
///
/// Accepts either a bare list or an object carrying a `results` list.
pub fn sanitize_movies(raw: &[Value]) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    raw.iter()
        .flat_map(|item| match item.get("results").and_then(Value::as_array) {
            Some(nested) => nested.iter().filter_map(Candidate::sanitize).collect::<Vec<_>>(),
            None => Candidate::sanitize(item).into_iter().collect(),
        })
        .filter(|candidate| seen.insert(candidate.id))
        .collect()
}

/// Decade label for a release date: "1980s", "classic" before 1900, empty when unknown.
pub fn era_label(release_date: &str) -> String {
    match parse_release_year(release_date) {
        Some(year) if year < 1900 => CLASSIC_ERA.to_string(),
        Some(year) => format!("{}s", year.div_euclid(10) * 10),
        None => String::new(),
    }
}

pub fn parse_release_year(release_date: &str) -> Option<i32> {
    let head = release_date.split('-').next()?.trim();
    if head.is_empty() || !head.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

pub fn year_key(release_date: &str) -> &str {
    match release_date.char_indices().nth(4) {
        Some((idx, _)) => &release_date[..idx],
        None => release_date,
    }
}

/// Integer coercion for ids and counts: integers, integral-looking floats and numeric strings.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Genre ids arrive either as `[28, 12]` or as `[{"id": 28, "name": "Action"}]`.
fn parse_genre_ids(value: Option<&Value>) -> BTreeSet<i64> {
    let Some(items) = value.and_then(Value::as_array) else {
        return BTreeSet::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => obj.get("id").and_then(coerce_i64),
            other => coerce_i64(other),
        })
        .collect()
}
