use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
};
use futures::{Stream, stream::BoxStream};
use mdview_core::{
    CloseReason, DomainEvent, RegistryStats, SubscriberId, Subscription, WatchError,
};
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::{
    errors::{AppError, AppResult},
    infra::app_state::AppState,
};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    pub path: Option<String>,
}

/// `GET /api/watch?path=<rel>`: SSE channel for one Markdown file.
pub async fn watch_file_handler(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> AppResult<Response> {
    let requested = query.path.unwrap_or_default();
    let opened = state.lifecycle().open_file(&requested).await;
    subscription_response(&state, opened)
}

/// `GET /api/sessions/watch`: SSE channel for the session corpus subtree.
pub async fn watch_sessions_handler(
    State(state): State<AppState>,
) -> AppResult<Response> {
    let opened = state.lifecycle().open_sessions().await;
    subscription_response(&state, opened)
}

/// `DELETE /api/watch/{subscriber_id}`. Always 204; unknown or malformed
/// ids are ignored.
pub async fn unwatch_handler(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> StatusCode {
    match subscriber_id.parse::<SubscriberId>() {
        Ok(id) => {
            if !state.lifecycle().close(id, CloseReason::Unwatch) {
                debug!(subscriber_id = %id, "unwatch for unknown subscriber");
            }
        }
        Err(_) => debug!(raw = %subscriber_id, "unwatch with malformed subscriber id"),
    }
    StatusCode::NO_CONTENT
}

/// `GET /api/watch/stats`
pub async fn watch_stats_handler(
    State(state): State<AppState>,
) -> AppResult<Json<RegistryStats>> {
    let stats = state.lifecycle().registry().stats().await?;
    Ok(Json(stats))
}

fn subscription_response(
    state: &AppState,
    opened: Result<Subscription, WatchError>,
) -> AppResult<Response> {
    let events: BoxStream<'static, DomainEvent> = match opened {
        Ok(subscription) => Box::pin(subscription.into_stream()),
        // The client asked for something valid; tell it over the channel it
        // asked for instead of failing the request.
        Err(WatchError::WatchStartFailed { path, message }) => {
            warn!(path = %path.display(), %message, "watch could not be started");
            Box::pin(tokio_stream::once(DomainEvent::error(format!(
                "Failed to watch {}: {message}",
                path.display()
            ))))
        }
        Err(err) => return Err(AppError::from(err)),
    };

    Ok(sse_response(events, state).into_response())
}

fn sse_response<S>(events: S, state: &AppState) -> impl IntoResponse
where
    S: Stream<Item = DomainEvent> + Send + 'static,
{
    let frames = events.filter_map(|event| match event.to_json() {
        Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
        Err(err) => {
            warn!("failed to serialise {} event: {err}", event.event_type());
            None
        }
    });

    let sse = Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(state.keep_alive())
            .text("keep-alive"),
    );

    // Axum already sets `Content-Type` and `Cache-Control: no-cache`.
    ([(X_ACCEL_BUFFERING, HeaderValue::from_static("no"))], sse)
}
