//! HTTP surface of mdview: SSE and WebSocket change notifications for
//! Markdown documents, plus the small REST helpers clients use around them.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use errors::{AppError, AppResult};
pub use infra::{
    app_state::AppState,
    startup::{WatchRuntime, build_runtime},
};
pub use routes::create_app;
