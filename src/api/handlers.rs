use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::{AppError, AppResult};
use crate::models::Candidate;
use crate::services::genres::GenreMap;
use crate::services::recommendations::Diagnostics;

use super::AppState;

/// Largest batch served in one request
const MAX_BATCH: usize = 20;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    pub genre_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub count: Option<usize>,
    pub genre_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GenresQuery {
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub movie_id: i64,
}

/// A movie with its genre ids resolved to names
#[derive(Debug, Serialize)]
pub struct MovieResponse {
    #[serde(flatten)]
    pub movie: Candidate,
    pub genre_names: Vec<String>,
}

impl MovieResponse {
    fn new(movie: Candidate, genres: &GenreMap) -> Self {
        let genre_names = genres.names_for(&movie.genre_ids);
        Self { movie, genre_names }
    }
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// One weighted random movie, optionally narrowed to a genre
pub async fn random_movie(
    State(state): State<AppState>,
    Query(query): Query<RandomQuery>,
) -> AppResult<Json<Value>> {
    let movie = state.service.pick(query.genre_id, None).await?;
    let genres = state.service.genre_map().await;
    Ok(Json(json!({
        "success": true,
        "movie": MovieResponse::new(movie, &genres),
    })))
}

/// A diversified batch of movies
pub async fn batch(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> AppResult<Json<Value>> {
    let count = query.count.unwrap_or(3);
    if count == 0 || count > MAX_BATCH {
        return Err(AppError::InvalidInput(format!(
            "count must be between 1 and {}",
            MAX_BATCH
        )));
    }

    let movies = state
        .service
        .batch(count, query.genre_id, None, &HashSet::new())
        .await?;
    let genres = state.service.genre_map().await;
    let movies: Vec<MovieResponse> = movies
        .into_iter()
        .map(|m| MovieResponse::new(m, &genres))
        .collect();

    Ok(Json(json!({ "success": true, "movies": movies })))
}

/// Re-fetches every era partition
pub async fn refresh(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let aggregation = state.service.refresh().await;
    if aggregation.is_empty() {
        return Err(AppError::ExternalApi("refresh returned no movies".to_string()));
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("refreshed {} movies", aggregation.items.len()),
        "from_snapshot": aggregation.from_snapshot,
        "partitions": aggregation.partitions,
    })))
}

pub async fn list_favorites(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "favorites": state.service.favorites() }))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    Json(request): Json<FavoriteRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let movie = state.service.add_favorite(request.movie_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "favorite": movie })),
    ))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    Json(request): Json<FavoriteRequest>,
) -> AppResult<Json<Value>> {
    state.service.remove_favorite(request.movie_id)?;
    Ok(Json(json!({ "success": true })))
}

/// Provider genre list
pub async fn genres(
    State(state): State<AppState>,
    Query(query): Query<GenresQuery>,
) -> AppResult<Json<Value>> {
    let genres = match query.language {
        Some(language) => {
            let client = state.service.client();
            GenreMap::load(client.as_ref(), &language).await
        }
        None => state.service.genre_map().await,
    };
    if genres.is_empty() {
        return Err(AppError::ExternalApi("genre list unavailable".to_string()));
    }
    Ok(Json(json!({ "success": true, "data": genres.genres() })))
}

pub async fn diagnostics(State(state): State<AppState>) -> Json<Diagnostics> {
    Json(state.service.diagnostics().await)
}
