use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{delete, get},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{file, health, watch, websocket},
    infra::app_state::AppState,
};

/// Routes under `/api`.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/watch", get(watch::watch_file_handler))
        .route("/watch/stats", get(watch::watch_stats_handler))
        .route("/watch/{subscriber_id}", delete(watch::unwatch_handler))
        .route("/sessions/watch", get(watch::watch_sessions_handler))
        .route("/file", get(file::file_metadata_handler))
}

pub fn create_app(state: AppState) -> Router {
    let cors_layer = cors_layer(&state);

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ws", get(websocket::websocket_handler))
        .nest("/api", create_api_router())
        // Outer to inner: CORS, then tracing.
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Permissive in dev mode or with a `*` origin, otherwise an allow-list.
/// An empty allow-list admits same-origin requests only.
fn cors_layer(state: &AppState) -> CorsLayer {
    let cors = &state.config().cors;
    if state.config().dev_mode || cors.is_wildcard_included() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::CACHE_CONTROL])
}
