//! Remote movie metadata provider abstraction
//!
//! The provider owns authentication and raw HTTP. It reports every outcome as a
//! `DiscoverResponse` value and never retries on its own; retry policy lives in
//! the fetcher.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::AppResult;

pub mod tmdb;

/// Query parameters for one discover call, ordered by key
pub type DiscoverParams = BTreeMap<String, Value>;

/// Outcome of one discover request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoverResponse {
    pub success: bool,
    pub results: Vec<Value>,
    /// `None` when no HTTP response was received (network failure, timeout)
    pub status_code: Option<u16>,
    pub error: Option<String>,
    /// Server-requested wait before the next attempt
    pub retry_after: Option<Duration>,
    pub total_pages: Option<u32>,
}

impl DiscoverResponse {
    pub fn ok(results: Vec<Value>) -> Self {
        Self {
            success: true,
            results,
            status_code: Some(200),
            ..Self::default()
        }
    }

    pub fn http_error(status: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: Some(status),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn network_error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A genre as listed by the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Trait for movie metadata providers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DiscoverClient: Send + Sync {
    /// Run one discover query
    async fn discover(&self, params: &DiscoverParams) -> DiscoverResponse;

    /// List the provider's movie genres in the given language
    async fn genres(&self, language: &str) -> AppResult<Vec<Genre>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
