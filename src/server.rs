use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::{cache, identity, timing};
use crate::AppState;

/// Builds the full Axum `Router`: demo pages, metrics endpoints, the
/// client reporting channel and the tracked pipeline around them.
pub fn create_router(state: Arc<AppState>) -> Router {
    let reporting_route = format!(
        "/{}",
        state.config.reporting_path.trim_start_matches('/')
    );

    Router::new()
        // ── Pages ───────────────────────────────────────────────
        .route("/", get(handlers::pages::home))
        .route("/pages/:name", get(handlers::pages::page))
        // ── Client-side reporting channel (never tracked) ───────
        .route(&reporting_route, post(handlers::client_log::receive))
        // ── Metrics ─────────────────────────────────────────────
        .route("/api/metrics", get(stream::get_metrics))
        .route("/api/metrics/stream", get(stream::metrics_stream))
        .route("/api/pipeline", get(stream::get_pipeline))
        // ── ExecuteHandler stage: matched routes only ───────────
        .route_layer(axum_mw::from_fn(timing::handler_stage))
        // ── Provide shared state to all routes above ────────────
        .with_state(state.clone())
        // ── Serve static/ directory ─────────────────────────────
        .fallback_service(ServeDir::new(&state.config.static_dir))
        // ── Tracked pipeline (applied bottom-up) ────────────────
        .layer(axum_mw::from_fn_with_state(state.clone(), cache::response_cache))
        .layer(axum_mw::from_fn_with_state(state.clone(), identity::authenticate))
        .layer(axum_mw::from_fn_with_state(state, timing::track_request))
        .layer(CorsLayer::permissive())
}
