//! Raw filesystem events and the typed notifications pushed to clients.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Opaque identifier of one open notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubscriberId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for SubscriberId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Add/change/unlink, as reported by the OS watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    Created,
    Modified,
    Removed,
}

/// One untyped filesystem notification for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: RawKind,
    pub is_dir: bool,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir: true,
        }
    }
}

/// Typed notification delivered to subscribers.
///
/// Serialises to the wire shape
/// `{"timestamp": <epoch ms>, "type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "connected")]
    Connected(ConnectedData),
    #[serde(rename = "file:changed")]
    FileChanged(FileData),
    #[serde(rename = "file:created")]
    FileCreated(FileData),
    #[serde(rename = "file:deleted")]
    FileDeleted(FileData),
    #[serde(rename = "session:created")]
    SessionCreated(SessionData),
    #[serde(rename = "error")]
    Error(ErrorData),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub subscriber_id: SubscriberId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorData {
    pub message: String,
}

impl DomainEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn connected(
        subscriber_id: SubscriberId,
        file_path: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self::new(EventPayload::Connected(ConnectedData {
            subscriber_id,
            file_path,
            last_modified,
        }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Error(ErrorData {
            message: message.into(),
        }))
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// JSON body carried in one SSE `data:` line or one WebSocket text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::Connected(_) => "connected",
            EventPayload::FileChanged(_) => "file:changed",
            EventPayload::FileCreated(_) => "file:created",
            EventPayload::FileDeleted(_) => "file:deleted",
            EventPayload::SessionCreated(_) => "session:created",
            EventPayload::Error(_) => "error",
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            EventPayload::FileChanged(data)
            | EventPayload::FileCreated(data)
            | EventPayload::FileDeleted(data) => Some(&data.file_path),
            EventPayload::Connected(data) => data.file_path.as_deref(),
            _ => None,
        }
    }
}
