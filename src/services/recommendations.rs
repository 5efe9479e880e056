use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::{Cache, FavoritesStore};
use crate::error::{AppError, AppResult};
use crate::models::{sanitize_movies, Candidate};
use crate::services::aggregator::{Aggregation, Aggregator, PartitionReport};
use crate::services::fetcher::{Fetcher, MetricsSnapshot};
use crate::services::genres::{filter_by_genre, GenreMap};
use crate::services::preferences::PreferencesStore;
use crate::services::providers::{tmdb::TmdbClient, DiscoverClient};
use crate::services::sampler;

/// Language used for genre names
pub const GENRE_LANGUAGE: &str = "en-US";

/// Fetcher counters plus the state of the candidate pool
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub fetch: MetricsSnapshot,
    pub pool_size: usize,
    pub from_snapshot: bool,
    pub partitions: Vec<PartitionReport>,
}

#[derive(Default)]
struct Pool {
    items: Vec<Value>,
    partitions: Vec<PartitionReport>,
    from_snapshot: bool,
    loaded: bool,
}

/// Wires aggregation, scoring and sampling together for the web and CLI front ends.
///
/// Holds the current candidate pool in memory; it is filled lazily on first use
/// and replaced by `refresh`.
pub struct RecommendationService {
    aggregator: Aggregator,
    favorites: FavoritesStore,
    preferences: PreferencesStore,
    pool: RwLock<Pool>,
    genres: RwLock<Option<GenreMap>>,
}

impl RecommendationService {
    pub fn new(
        aggregator: Aggregator,
        favorites: FavoritesStore,
        preferences: PreferencesStore,
    ) -> Self {
        Self {
            aggregator,
            favorites,
            preferences,
            pool: RwLock::new(Pool::default()),
            genres: RwLock::new(None),
        }
    }

    /// Builds the full pipeline around any provider.
    pub fn with_client(client: Arc<dyn DiscoverClient>, config: &Config) -> AppResult<Self> {
        let fetcher = Arc::new(Fetcher::new(client, config.retry_policy()));
        let cache = Cache::new(&config.cache_dir)?;
        let aggregator = Aggregator::new(fetcher, cache, config.cache_ttl(), config.max_random_page);
        let preferences = PreferencesStore::new(&config.preferences_path);
        if let Err(e) = preferences.create_default_if_missing() {
            tracing::warn!(error = %e, "Could not write default preferences");
        }
        Ok(Self::new(
            aggregator,
            FavoritesStore::new(&config.favorites_path),
            preferences,
        ))
    }

    /// Builds the pipeline against TMDb.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let client = TmdbClient::new(
            config.tmdb_api_key.clone(),
            config.tmdb_base_url.clone(),
            config.tmdb_key_type,
            config.request_timeout(),
        )?;
        Self::with_client(Arc::new(client), config)
    }

    pub fn preferences(&self) -> &PreferencesStore {
        &self.preferences
    }

    pub fn client(&self) -> Arc<dyn DiscoverClient> {
        Arc::clone(self.aggregator.fetcher().client())
    }

    /// Current pool, aggregating on first use.
    pub async fn pool(&self) -> Vec<Value> {
        {
            let pool = self.pool.read().await;
            if pool.loaded {
                return pool.items.clone();
            }
        }

        let mut pool = self.pool.write().await;
        if !pool.loaded {
            let aggregation = self.aggregator.collect(false).await;
            Self::install(&mut pool, aggregation);
        }
        pool.items.clone()
    }

    /// Re-fetches every partition, bypassing fresh cache entries.
    ///
    /// The previous pool is kept when the refresh yields nothing.
    pub async fn refresh(&self) -> Aggregation {
        let aggregation = self.aggregator.collect(true).await;
        let mut pool = self.pool.write().await;
        if aggregation.is_empty() && !pool.items.is_empty() {
            tracing::warn!(kept = pool.items.len(), "Refresh returned nothing, keeping current pool");
            pool.partitions = aggregation.partitions.clone();
            return aggregation;
        }
        Self::install(&mut pool, aggregation.clone());
        aggregation
    }

    fn install(pool: &mut Pool, aggregation: Aggregation) {
        tracing::info!(
            size = aggregation.items.len(),
            from_snapshot = aggregation.from_snapshot,
            "Candidate pool loaded"
        );
        pool.items = aggregation.items;
        pool.partitions = aggregation.partitions;
        pool.from_snapshot = aggregation.from_snapshot;
        pool.loaded = true;
    }

    /// Genre map, fetched once. An empty map is not kept so the next call retries.
    pub async fn genre_map(&self) -> GenreMap {
        if let Some(map) = self.genres.read().await.as_ref() {
            return map.clone();
        }
        let client = self.aggregator.fetcher().client();
        let map = GenreMap::load(client.as_ref(), GENRE_LANGUAGE).await;
        if !map.is_empty() {
            *self.genres.write().await = Some(map.clone());
        }
        map
    }

    /// Pool narrowed to a genre, or the whole pool when nothing matches.
    async fn candidates_for(&self, genre_id: Option<i64>) -> AppResult<Vec<Value>> {
        let pool = self.pool().await;
        if pool.is_empty() {
            return Err(AppError::NotFound("no movies available".to_string()));
        }
        let Some(genre_id) = genre_id else {
            return Ok(pool);
        };
        let filtered = filter_by_genre(&pool, Some(genre_id), None, &GenreMap::default());
        if filtered.is_empty() {
            tracing::debug!(genre_id, "No movies in genre, using full pool");
            return Ok(pool);
        }
        Ok(filtered)
    }

    /// One weighted pick. Falls back to a uniform choice when scoring filters everything out.
    pub async fn pick(&self, genre_id: Option<i64>, seed: Option<u64>) -> AppResult<Candidate> {
        let candidates = self.candidates_for(genre_id).await?;
        let prefs = self.preferences.effective(None);

        if let Some(movie) = sampler::pick_one(&candidates, &prefs, seed) {
            return Ok(movie);
        }

        tracing::info!("Scoring left no candidates, choosing uniformly");
        sanitize_movies(&candidates)
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| AppError::NotFound("no movies available".to_string()))
    }

    /// A diversified batch of up to `count` movies, avoiding `exclude_ids` where possible.
    pub async fn batch(
        &self,
        count: usize,
        genre_id: Option<i64>,
        seed: Option<u64>,
        exclude_ids: &HashSet<i64>,
    ) -> AppResult<Vec<Candidate>> {
        let candidates = self.candidates_for(genre_id).await?;
        let prefs = self.preferences.effective(None);
        Ok(sampler::pick_batch(
            &candidates,
            count,
            &prefs,
            seed,
            prefs.diversify_by,
            exclude_ids,
        ))
    }

    pub fn favorites(&self) -> Vec<Candidate> {
        self.favorites.list()
    }

    /// Saves a movie from the current pool as a favorite.
    pub async fn add_favorite(&self, movie_id: i64) -> AppResult<Candidate> {
        let pool = self.pool().await;
        let movie = sanitize_movies(&pool)
            .into_iter()
            .find(|m| m.id == movie_id)
            .ok_or_else(|| AppError::NotFound(format!("movie {} not found", movie_id)))?;
        self.favorites.add(&movie)?;
        Ok(movie)
    }

    pub fn remove_favorite(&self, movie_id: i64) -> AppResult<()> {
        if self.favorites.remove(movie_id)? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("favorite {} not found", movie_id)))
        }
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let pool = self.pool.read().await;
        Diagnostics {
            fetch: self.aggregator.fetcher().metrics(),
            pool_size: pool.items.len(),
            from_snapshot: pool.from_snapshot,
            partitions: pool.partitions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::aggregator::EraPartition;
    use crate::services::fetcher::RetryPolicy;
    use crate::services::providers::{DiscoverResponse, MockDiscoverClient};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(mock: MockDiscoverClient, dir: &TempDir) -> RecommendationService {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        };
        let fetcher = Arc::new(Fetcher::new(Arc::new(mock), policy));
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        let aggregator = Aggregator::new(fetcher, cache, Duration::from_secs(3600), 1)
            .with_eras(vec![EraPartition::new("only", 2010, 2010)]);
        RecommendationService::new(
            aggregator,
            FavoritesStore::new(dir.path().join("favorites.json")),
            PreferencesStore::new(dir.path().join("preferences.json")),
        )
    }

    fn catalog() -> Vec<Value> {
        vec![
            json!({"id": 1, "title": "Heat", "genre_ids": [80], "popularity": 40, "vote_average": 8.0, "release_date": "1995-12-15"}),
            json!({"id": 2, "title": "Up", "genre_ids": [16], "popularity": 60, "vote_average": 7.9, "release_date": "2009-05-29"}),
            json!({"id": 3, "title": "Alien", "genre_ids": [878, 27], "popularity": 50, "vote_average": 8.1, "release_date": "1979-05-25"}),
        ]
    }

    fn serving(items: Vec<Value>) -> MockDiscoverClient {
        let mut mock = MockDiscoverClient::new();
        mock.expect_name().return_const("mock");
        mock.expect_discover()
            .returning(move |_| DiscoverResponse::ok(items.clone()));
        mock
    }

    #[tokio::test]
    async fn test_pool_loads_once() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockDiscoverClient::new();
        mock.expect_name().return_const("mock");
        mock.expect_discover()
            .times(1)
            .returning(|_| DiscoverResponse::ok(catalog()));
        let service = service(mock, &dir);

        assert_eq!(service.pool().await.len(), 3);
        assert_eq!(service.pool().await.len(), 3);
        assert_eq!(service.diagnostics().await.fetch.requests, 1);
    }

    #[tokio::test]
    async fn test_empty_pool_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockDiscoverClient::new();
        mock.expect_name().return_const("mock");
        mock.expect_discover()
            .returning(|_| DiscoverResponse::http_error(401, "bad key"));
        let service = service(mock, &dir);

        assert!(matches!(service.pick(None, Some(1)).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_genre_filter_falls_back_to_full_pool() {
        let dir = TempDir::new().unwrap();
        let service = service(serving(catalog()), &dir);

        let movie = service.pick(Some(16), Some(5)).await.unwrap();
        assert_eq!(movie.id, 2);

        let movie = service.pick(Some(12345), Some(5)).await.unwrap();
        assert!([1, 2, 3].contains(&movie.id));
    }

    #[tokio::test]
    async fn test_pick_falls_back_when_everything_is_filtered() {
        let dir = TempDir::new().unwrap();
        let service = service(serving(vec![json!({"id": 9, "title": "Adult", "adult": true})]), &dir);
        assert_eq!(service.pick(None, None).await.unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_batch_respects_count() {
        let dir = TempDir::new().unwrap();
        let service = service(serving(catalog()), &dir);
        let batch = service.batch(2, None, Some(3), &HashSet::new()).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_keeps_pool_when_empty() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockDiscoverClient::new();
        mock.expect_name().return_const("mock");
        let mut calls = 0;
        mock.expect_discover().returning(move |_| {
            calls += 1;
            if calls == 1 {
                DiscoverResponse::ok(catalog())
            } else {
                DiscoverResponse::http_error(404, "gone")
            }
        });
        let service = service(mock, &dir);

        assert_eq!(service.pool().await.len(), 3);
        // the stale partition entry still serves the items on a failed refresh
        let aggregation = service.refresh().await;
        assert_eq!(
            aggregation.partitions[0].source,
            crate::services::aggregator::PartitionSource::StaleCache
        );
        assert_eq!(service.pool().await.len(), 3);
        assert_eq!(service.diagnostics().await.fetch.failures, 1);
    }

    #[tokio::test]
    async fn test_favorites_round_trip() {
        let dir = TempDir::new().unwrap();
        let service = service(serving(catalog()), &dir);

        let saved = service.add_favorite(3).await.unwrap();
        assert_eq!(saved.title, "Alien");
        assert_eq!(service.favorites().len(), 1);
        assert!(matches!(service.add_favorite(99).await, Err(AppError::NotFound(_))));

        tokio_test::assert_ok!(service.remove_favorite(3));
        assert!(service.favorites().is_empty());
        assert!(matches!(service.remove_favorite(3), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_genre_map_is_cached_after_success() {
        let dir = TempDir::new().unwrap();
        let mut mock = serving(catalog());
        mock.expect_genres().times(1).returning(|_| {
            Ok(vec![crate::services::providers::Genre {
                id: 16,
                name: "Animation".to_string(),
            }])
        });
        let service = service(mock, &dir);

        assert_eq!(service.genre_map().await.name_for(16), Some("Animation"));
        assert_eq!(service.genre_map().await.name_for(16), Some("Animation"));
    }
}
