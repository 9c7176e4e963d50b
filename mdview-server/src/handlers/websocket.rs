use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use mdview_core::{CloseReason, DomainEvent, Subscription};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::infra::app_state::AppState;

/// Messages a legacy client may send.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Watch { path: String },
    Unwatch,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One socket carries at most one subscription; a new `watch` replaces it.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut active: Option<Subscription> = None;
    let mut reason = CloseReason::ClientDisconnect;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Some(error) = apply(message, &state, &mut active).await
                                && send_event(&mut ws_sender, &error).await.is_err()
                            {
                                reason = CloseReason::TransportError;
                                break;
                            }
                        }
                        Err(err) => debug!("ignoring malformed websocket message: {err}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("websocket receive failed: {err}");
                    reason = CloseReason::TransportError;
                    break;
                }
            },
            event = next_event(&mut active) => match event {
                Some(event) => {
                    if send_event(&mut ws_sender, &event).await.is_err() {
                        reason = CloseReason::TransportError;
                        break;
                    }
                }
                None => {
                    // Detached by the registry (overflow or shutdown).
                    active = None;
                    if state.lifecycle().is_shutting_down() {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            },
        }
    }

    if let Some(subscription) = active.take() {
        subscription.close(reason);
    }
}

/// Returns an `error` event to report back to the client, if any.
async fn apply(
    message: ClientMessage,
    state: &AppState,
    active: &mut Option<Subscription>,
) -> Option<DomainEvent> {
    if let Some(previous) = active.take() {
        previous.close(CloseReason::Unwatch);
    }

    match message {
        ClientMessage::Watch { path } => match state.lifecycle().open_file(&path).await {
            Ok(subscription) => {
                *active = Some(subscription);
                None
            }
            Err(err) => {
                warn!(path = %path, "websocket watch rejected: {err}");
                Some(DomainEvent::error(err.to_string()))
            }
        },
        ClientMessage::Unwatch => None,
    }
}

async fn next_event(active: &mut Option<Subscription>) -> Option<DomainEvent> {
    match active {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &DomainEvent,
) -> Result<(), axum::Error> {
    match event.to_json() {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            warn!("failed to serialise {} event: {err}", event.event_type());
            Ok(())
        }
    }
}
