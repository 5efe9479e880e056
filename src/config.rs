use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::fetcher::RetryPolicy;
use crate::services::providers::tmdb::KeyType;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// TMDb API key (v3 key or v4 read token, see `tmdb_key_type`)
    #[serde(default)]
    pub tmdb_api_key: String,

    /// TMDb API base URL
    #[serde(default = "default_tmdb_base_url")]
    pub tmdb_base_url: String,

    /// How the key is sent upstream
    #[serde(default)]
    pub tmdb_key_type: KeyType,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Additional attempts after the first failed fetch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Directory holding one JSON file per cached query
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Cache time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_favorites_path")]
    pub favorites_path: PathBuf,

    #[serde(default = "default_preferences_path")]
    pub preferences_path: PathBuf,

    /// Upper bound for the random page drawn per era partition
    #[serde(default = "default_max_random_page")]
    pub max_random_page: u32,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_tmdb_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    300
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_favorites_path() -> PathBuf {
    PathBuf::from("data/favorites.json")
}

fn default_preferences_path() -> PathBuf {
    PathBuf::from("config/preferences.json")
}

fn default_max_random_page() -> u32 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Checks that an API key is present and plausibly shaped.
pub fn validate_api_key(key: &str) -> bool {
    key.trim().chars().count() >= 6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_env_is_empty() {
        let config: Config = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.tmdb_base_url, "https://api.themoviedb.org/3");
        assert_eq!(config.tmdb_key_type, KeyType::V3);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.bind_address(), "127.0.0.1:5000");
    }

    #[test]
    fn test_env_overrides_defaults() {
        let vars = vec![
            ("TMDB_API_KEY".to_string(), "abcdef123".to_string()),
            ("TMDB_KEY_TYPE".to_string(), "v4".to_string()),
            ("MAX_RETRIES".to_string(), "5".to_string()),
            ("CACHE_DIR".to_string(), "/tmp/reelpick".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.tmdb_api_key, "abcdef123");
        assert_eq!(config.tmdb_key_type, KeyType::V4);
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/reelpick"));
    }

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key("abcdef"));
        assert!(validate_api_key("  abcdef  "));
        assert!(!validate_api_key("abc"));
        assert!(!validate_api_key("     "));
    }
}
