use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use similarity_core::config::SearchConfig;
use similarity_core::persist::{load_model, ModelPaths};
use similarity_core::repository::{Model, SearchRequest};
use similarity_core::SearchHit;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const MAX_K: usize = 100;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub took_s: f64,
    pub results: Vec<SearchHit>,
}

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<Model>,
    pub search: SearchConfig,
}

/// Load the model once and refuse to start on any load error.
pub fn build_app(model_dir: &Path, search: SearchConfig) -> Result<Router> {
    let model = load_model(&ModelPaths::new(model_dir))?;
    Ok(build_app_with(Arc::new(model), search))
}

pub fn build_app_with(model: Arc<Model>, search: SearchConfig) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", post(search_handler))
        .with_state(AppState { model, search })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(mut request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    request.k = Some(request.k.unwrap_or(state.search.top_k).clamp(1, MAX_K));
    let model = state.model.clone();
    let search = state.search.clone();
    // scoring is CPU-bound; keep it off the async workers
    let hits = tokio::task::spawn_blocking(move || model.search(&request, &search))
        .await
        .map_err(|e| internal(&e))?
        .map_err(|e| internal(&e))?;
    Ok(Json(SearchResponse { took_s: start.elapsed().as_secs_f64(), results: hits }))
}

fn internal(e: &dyn std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %e, "search failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}
