use axum::{middleware, routing::get, routing::post, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Recommendations
        .route("/random", get(handlers::random_movie))
        .route("/batch", get(handlers::batch))
        .route("/refresh", post(handlers::refresh))
        // Favorites
        .route(
            "/favorites",
            get(handlers::list_favorites)
                .post(handlers::add_favorite)
                .delete(handlers::remove_favorite),
        )
        // Metadata
        .route("/genres", get(handlers::genres))
        .route("/diagnostics", get(handlers::diagnostics))
}
