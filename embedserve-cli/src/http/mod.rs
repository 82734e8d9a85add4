//! axum router assembly: routes, shared state, CORS, and the optional
//! API-key layer (`SPEC_FULL.md` §4.5).
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use embedserve::EngineArray;

pub mod auth;
pub mod handlers;
pub mod schemas;

/// Shared state reachable from every handler.
pub struct AppState {
    pub engines: EngineArray,
    pub api_key: Option<String>,
    pub prometheus_handle: PrometheusHandle,
}

/// Builds the full router: `/health` unauthenticated, everything else
/// behind the optional API-key layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/models", get(handlers::models))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
