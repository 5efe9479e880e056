use chrono::{Datelike, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::{Cache, CacheKey};
use crate::models::movie::{coerce_i64, era_label};
use crate::services::fetcher::Fetcher;
use crate::services::providers::DiscoverParams;

/// Items kept from a single partition page
const MAX_ITEMS_PER_PARTITION: usize = 20;

/// Minimum vote count requested upstream for every partition
const MIN_VOTE_COUNT: u32 = 50;

/// One fixed historical date range used to diversify fetch queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EraPartition {
    pub label: String,
    pub start_year: i32,
    pub end_year: i32,
}

impl EraPartition {
    pub fn new(label: impl Into<String>, start_year: i32, end_year: i32) -> Self {
        Self {
            label: label.into(),
            start_year,
            end_year: end_year.max(start_year),
        }
    }

    /// The five default eras, the last one ending at `current_year`
    pub fn defaults(current_year: i32) -> Vec<EraPartition> {
        vec![
            EraPartition::new("classic era", 1950, 1975),
            EraPartition::new("golden era", 1976, 1989),
            EraPartition::new("early modern", 1990, 2005),
            EraPartition::new("mid modern", 2006, 2015),
            EraPartition::new("recent", 2016, current_year),
        ]
    }
}

/// A partition with its randomized query parameters fixed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionQuery {
    pub era: EraPartition,
    pub year: i32,
    pub page: u32,
}

impl PartitionQuery {
    pub fn params(&self) -> DiscoverParams {
        let mut params = DiscoverParams::new();
        params.insert("primary_release_year".to_string(), json!(self.year));
        params.insert("page".to_string(), json!(self.page));
        params.insert("sort_by".to_string(), json!("popularity.desc"));
        params.insert("vote_count.gte".to_string(), json!(MIN_VOTE_COUNT));
        params
    }
}

/// Where a partition's items came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionSource {
    Cache,
    Network,
    StaleCache,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub label: String,
    pub year: i32,
    pub page: u32,
    pub count: usize,
    pub source: PartitionSource,
}

/// Merged, deduplicated result of one aggregation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub items: Vec<Value>,
    pub partitions: Vec<PartitionReport>,
    /// True when every partition failed and the last snapshot was served instead
    pub from_snapshot: bool,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fans out one query per era partition and merges the results.
pub struct Aggregator {
    fetcher: Arc<Fetcher>,
    cache: Cache,
    cache_ttl: Duration,
    eras: Vec<EraPartition>,
    max_random_page: u32,
    /// Last page count the provider reported per era label
    page_ceilings: Mutex<HashMap<String, u32>>,
    rng: Mutex<StdRng>,
}

impl Aggregator {
    pub fn new(fetcher: Arc<Fetcher>, cache: Cache, cache_ttl: Duration, max_random_page: u32) -> Self {
        Self {
            fetcher,
            cache,
            cache_ttl,
            eras: EraPartition::defaults(Utc::now().year()),
            max_random_page: max_random_page.max(1),
            page_ceilings: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_eras(mut self, eras: Vec<EraPartition>) -> Self {
        self.eras = eras;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    /// Picks a random year inside each era and a random page up to the ceiling.
    ///
    /// The ceiling is `max_random_page`, lowered to the provider's page count
    /// once a fetch for that era has reported one.
    pub fn plan(&self) -> Vec<PartitionQuery> {
        let ceilings = lock(&self.page_ceilings).clone();
        let mut rng = lock(&self.rng);
        self.eras
            .iter()
            .map(|era| {
                let ceiling = ceilings
                    .get(&era.label)
                    .map_or(self.max_random_page, |&total| total.clamp(1, self.max_random_page));
                PartitionQuery {
                    era: era.clone(),
                    year: rng.gen_range(era.start_year..=era.end_year),
                    page: rng.gen_range(1..=ceiling),
                }
            })
            .collect()
    }

    /// Collects candidates across all era partitions.
    ///
    /// Never fails: partitions without data are skipped, and if all of them
    /// fail the last snapshot (of any age) is returned, or an empty aggregation.
    pub async fn collect(&self, force_refresh: bool) -> Aggregation {
        let queries = self.plan();
        let mut batches = Vec::with_capacity(queries.len());
        let mut partitions = Vec::with_capacity(queries.len());

        for query in &queries {
            let (items, source) = self.load_partition(query, force_refresh).await;
            tracing::info!(
                era = %query.era.label,
                year = query.year,
                page = query.page,
                count = items.len(),
                source = ?source,
                "Partition loaded"
            );
            partitions.push(PartitionReport {
                label: query.era.label.clone(),
                year: query.year,
                page: query.page,
                count: items.len(),
                source,
            });
            batches.push((query.era.label.clone(), items));
        }

        let items = merge_partitions(batches);

        if items.is_empty() {
            tracing::warn!("No partition returned data, falling back to last snapshot");
            let snapshot: Option<Vec<Value>> = self.cache.get_raw(&CacheKey::Snapshot);
            return match snapshot {
                Some(items) if !items.is_empty() => Aggregation {
                    items,
                    partitions,
                    from_snapshot: true,
                },
                _ => Aggregation {
                    items: Vec::new(),
                    partitions,
                    from_snapshot: false,
                },
            };
        }

        if let Err(e) = self.cache.put(&CacheKey::Snapshot, &items) {
            tracing::error!(error = %e, "Failed to write aggregation snapshot");
        }
        tracing::info!(total = items.len(), "Aggregation complete");

        Aggregation {
            items,
            partitions,
            from_snapshot: false,
        }
    }

    /// Fresh cache, then network (writing back on success), then stale cache.
    async fn load_partition(
        &self,
        query: &PartitionQuery,
        force_refresh: bool,
    ) -> (Vec<Value>, PartitionSource) {
        let params = query.params();
        let key = CacheKey::for_query(&params);

        if !force_refresh {
            if let Some(items) = self.cache.get::<Vec<Value>>(&key, self.cache_ttl) {
                return (truncate(items), PartitionSource::Cache);
            }
        }

        match self.fetcher.fetch(&params).await {
            Ok(page) => {
                if let Some(total) = page.total_pages {
                    lock(&self.page_ceilings).insert(query.era.label.clone(), total);
                }
                if page.items.is_empty() {
                    tracing::info!(era = %query.era.label, page = query.page, "Partition page empty, not cached");
                    return (Vec::new(), PartitionSource::Network);
                }
                if let Err(e) = self.cache.put(&key, &page.items) {
                    tracing::error!(key = %key, error = %e, "Failed to cache partition result");
                }
                (truncate(page.items), PartitionSource::Network)
            }
            Err(e) => {
                tracing::warn!(era = %query.era.label, error = %e, "Partition fetch failed");
                match self.cache.get_raw::<Vec<Value>>(&key) {
                    Some(items) => (truncate(items), PartitionSource::StaleCache),
                    None => (Vec::new(), PartitionSource::Failed),
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn truncate(mut items: Vec<Value>) -> Vec<Value> {
    items.truncate(MAX_ITEMS_PER_PARTITION);
    items
}

/// Identity used for cross-partition dedup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Id(i64),
    TitleDate(String, String),
}

fn dedup_key(item: &Value) -> Option<DedupKey> {
    if let Some(id) = item.get("id").and_then(coerce_i64) {
        return Some(DedupKey::Id(id));
    }
    let text = |key: &str| item.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    let title = text("title");
    let date = text("release_date");
    if title.is_empty() && date.is_empty() {
        return None;
    }
    Some(DedupKey::TitleDate(title, date))
}

/// Concatenates partition results, tags provenance and drops repeats (first seen wins).
pub fn merge_partitions(batches: Vec<(String, Vec<Value>)>) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for (label, items) in batches {
        for item in items {
            let Value::Object(mut obj) = item else {
                continue;
            };
            if let Some(key) = dedup_key(&Value::Object(obj.clone())) {
                if !seen.insert(key) {
                    continue;
                }
            }
            obj.entry("source_era").or_insert_with(|| json!(label));
            if !obj.contains_key("era_tag") {
                let date = obj
                    .get("release_date")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                obj.insert("era_tag".to_string(), json!(era_label(&date)));
            }
            merged.push(Value::Object(obj));
        }
    }

    merged
}
