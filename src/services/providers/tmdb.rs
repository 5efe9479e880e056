//! TMDb API provider
//!
//! API Flow:
//! 1. Discover: /discover/movie → paged movie list filtered by release year etc.
//! 2. Genres: /genre/movie/list → id/name pairs for display and filtering
//!
//! v3 keys travel as the `api_key` query parameter, v4 read tokens as a bearer header.
use reqwest::{header, Client as HttpClient, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{DiscoverClient, DiscoverParams, DiscoverResponse, Genre};
use crate::error::{AppError, AppResult};

const MAX_TOTAL_PAGES: u32 = 500;

/// How the API key is presented to TMDb
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    V3,
    V4,
}

#[derive(Clone)]
pub struct TmdbClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    key_type: KeyType,
}

impl TmdbClient {
    pub fn new(
        api_key: String,
        api_url: String,
        key_type: KeyType,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
                headers
            })
            .build()?;

        Ok(Self {
            http_client,
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            key_type,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.api_url, path.trim_start_matches('/'));
        let request = self.http_client.get(url);
        match self.key_type {
            KeyType::V3 => request.query(&[("api_key", self.api_key.as_str())]),
            KeyType::V4 => request.bearer_auth(&self.api_key),
        }
    }
}

/// Converts JSON parameter values into query-string pairs.
fn query_pairs(params: &DiscoverParams) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Reads the movie list out of a discover body: `results`, or `data` as an alternate field.
fn extract_results(body: &Value) -> Vec<Value> {
    body.get("results")
        .or_else(|| body.get("data"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn extract_total_pages(body: &Value) -> Option<u32> {
    ["total_pages", "totalPages"]
        .iter()
        .find_map(|key| body.get(*key))
        .and_then(|v| v.as_u64())
        .map(|n| (n.min(u64::from(MAX_TOTAL_PAGES)) as u32).max(1))
}

fn describe_status(status: StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 | 403 => "authentication failed, check the API key".to_string(),
        404 => "resource not found".to_string(),
        429 => "rate limited, try again later".to_string(),
        500..=599 => format!("server unavailable ({})", status),
        _ => format!("TMDb API returned status {}: {}", status, body),
    }
}

#[async_trait::async_trait]
impl DiscoverClient for TmdbClient {
    async fn discover(&self, params: &DiscoverParams) -> DiscoverResponse {
        let response = match self
            .get("discover/movie")
            .query(&query_pairs(params))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, provider = "tmdb", "Discover request failed");
                return DiscoverResponse::network_error(e.to_string());
            }
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, provider = "tmdb", "Discover returned error status");
            return DiscoverResponse {
                retry_after,
                ..DiscoverResponse::http_error(status.as_u16(), describe_status(status, &body))
            };
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, provider = "tmdb", "Discover body was not JSON");
                return DiscoverResponse::network_error(format!("invalid response body: {}", e));
            }
        };

        let results = extract_results(&body);
        tracing::debug!(results = results.len(), provider = "tmdb", "Discover completed");

        DiscoverResponse {
            success: true,
            status_code: Some(status.as_u16()),
            total_pages: extract_total_pages(&body),
            results,
            error: None,
            retry_after: None,
        }
    }

    async fn genres(&self, language: &str) -> AppResult<Vec<Genre>> {
        #[derive(Deserialize)]
        struct GenreList {
            genres: Vec<Genre>,
        }

        let response = self
            .get("genre/movie/list")
            .query(&[("language", language)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(describe_status(status, &body)));
        }

        let list: GenreList = response.json().await?;
        tracing::info!(count = list.genres.len(), language = %language, provider = "tmdb", "Genres fetched");
        Ok(list.genres)
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
