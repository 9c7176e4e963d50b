//! Subscription lifecycle.
//!
//! The [`LifecycleManager`] owns every open [`Subscription`]. It validates
//! requests, attaches subscribers to the watch registry and guarantees that
//! each subscription is released from the registry exactly once, whichever
//! of disconnect, unwatch, transport error or shutdown gets there first.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classify;
use crate::error::{Result, WatchError};
use crate::events::{DomainEvent, SubscriberId};
use crate::path::{self, PathRejection};
use crate::registry::{ShutdownReport, WatchRegistry};
use crate::target::{TargetKey, TargetKind, WatchTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Opening,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClientDisconnect,
    Unwatch,
    TransportError,
    WatchStartFailed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseReason::ClientDisconnect => "client_disconnect",
            CloseReason::Unwatch => "unwatch",
            CloseReason::TransportError => "transport_error",
            CloseReason::WatchStartFailed => "watch_start_failed",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

/// Roots and limits the manager resolves requests against.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Canonical content root.
    pub content_root: PathBuf,
    /// Canonical session corpus root, when session watching is enabled.
    pub sessions_root: Option<PathBuf>,
    pub sessions_max_depth: usize,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone)]
struct SubscriptionRecord {
    target: TargetKey,
    state: SubscriptionState,
    opened_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    registry: WatchRegistry,
    settings: LifecycleSettings,
    records: DashMap<SubscriberId, SubscriptionRecord>,
    shutting_down: AtomicBool,
}

/// Cloneable handle; all clones share one subscription table.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    pub fn new(registry: WatchRegistry, settings: LifecycleSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                settings,
                records: DashMap::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.inner.settings
    }

    /// Resolve a client-relative path to an existing Markdown file under the
    /// content root.
    pub async fn resolve_file(&self, requested: &str) -> Result<WatchTarget> {
        let root = &self.inner.settings.content_root;
        let resolved = path::validate(requested, root)?;
        let label = path::display_relative(&resolved, root)
            .ok_or(WatchError::InvalidPath(PathRejection::Empty))?;

        let canonical = match tokio::fs::canonicalize(&resolved).await {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::TargetMissing(resolved));
            }
            Err(err) => return Err(err.into()),
        };

        // Symlinks may point anywhere; containment is checked again on the
        // real path.
        if !path::is_within(&canonical, root) {
            return Err(PathRejection::OutsideRoot.into());
        }

        let metadata = tokio::fs::metadata(&canonical).await?;
        if !metadata.is_file() {
            return Err(WatchError::TargetMissing(resolved));
        }

        Ok(WatchTarget::single_file(canonical, label))
    }

    /// Target for the session corpus subtree.
    pub async fn sessions_target(&self) -> Result<WatchTarget> {
        let settings = &self.inner.settings;
        let root = settings
            .sessions_root
            .as_ref()
            .ok_or(WatchError::SessionsDisabled)?;

        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(WatchError::TargetMissing(root.clone())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::TargetMissing(root.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        Ok(WatchTarget::subtree(root.clone(), settings.sessions_max_depth))
    }

    pub async fn open_file(&self, requested: &str) -> Result<Subscription> {
        let target = self.resolve_file(requested).await?;
        self.open(target).await
    }

    pub async fn open_sessions(&self) -> Result<Subscription> {
        let target = self.sessions_target().await?;
        self.open(target).await
    }

    /// Register a new subscription on `target`. The returned subscription
    /// has already been sent its `connected` greeting.
    pub async fn open(&self, target: WatchTarget) -> Result<Subscription> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(WatchError::RegistryClosed);
        }

        let id = SubscriberId::new();
        let key = target.key();
        self.inner.records.insert(
            id,
            SubscriptionRecord {
                target: key.clone(),
                state: SubscriptionState::Opening,
                opened_at: Utc::now(),
            },
        );
        // Armed before the first await so a caller that is cancelled while
        // opening still releases whatever the registry attached.
        let guard = SubscriptionGuard {
            id,
            manager: self.clone(),
        };

        let greeting = self.greeting(id, &target).await;
        let (tx, rx) = mpsc::channel(self.inner.settings.channel_capacity.max(1));

        match self
            .inner
            .registry
            .acquire(target.clone(), id, tx, greeting)
            .await
        {
            Ok(outcome) => {
                if let Some(mut record) = self.inner.records.get_mut(&id) {
                    record.state = SubscriptionState::Active;
                }
                info!(
                    subscriber_id = %id,
                    target = %key,
                    shared_with = outcome.subscribers - 1,
                    "subscription opened"
                );
                Ok(Subscription {
                    id,
                    target,
                    events: rx,
                    guard,
                })
            }
            Err(err) => {
                self.close(id, CloseReason::WatchStartFailed);
                Err(err)
            }
        }
    }

    async fn greeting(&self, id: SubscriberId, target: &WatchTarget) -> DomainEvent {
        match target.kind() {
            TargetKind::SingleFile => {
                let last_modified = classify::last_modified(target.root_path()).await;
                DomainEvent::connected(id, Some(target.label().to_string()), last_modified)
            }
            TargetKind::DirectorySubtree => DomainEvent::connected(id, None, None),
        }
    }

    /// Close the subscription `id`. Returns `true` only for the call that
    /// actually performed the close.
    pub fn close(&self, id: SubscriberId, reason: CloseReason) -> bool {
        let Some((_, record)) = self.inner.records.remove(&id) else {
            return false;
        };

        if !self.inner.registry.release(&record.target, id) {
            debug!(subscriber_id = %id, "registry already stopped during close");
        }

        let lifetime = Utc::now().signed_duration_since(record.opened_at);
        info!(
            subscriber_id = %id,
            target = %record.target,
            %reason,
            was = ?record.state,
            lifetime_ms = lifetime.num_milliseconds(),
            "subscription closed"
        );
        true
    }

    pub fn state(&self, id: SubscriberId) -> SubscriptionState {
        self.inner
            .records
            .get(&id)
            .map(|record| record.state)
            .unwrap_or(SubscriptionState::Closed)
    }

    pub fn open_subscriptions(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Close every subscription and stop the registry. New opens are refused
    /// from the moment this is called.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("lifecycle shutdown already in progress");
        }

        let ids: Vec<SubscriberId> = self
            .inner
            .records
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let closed = ids
            .into_iter()
            .filter(|id| self.close(*id, CloseReason::Shutdown))
            .count();

        match self.inner.registry.shutdown().await {
            Ok(report) => {
                info!(
                    closed_subscriptions = closed,
                    leftover_watches = report.entries,
                    "watch lifecycle shut down"
                );
                Ok(report)
            }
            Err(err) => {
                warn!("watch registry was already stopped: {}", err);
                Err(err)
            }
        }
    }
}

/// Closes its subscription when dropped.
struct SubscriptionGuard {
    id: SubscriberId,
    manager: LifecycleManager,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.manager.close(self.id, CloseReason::ClientDisconnect);
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .finish()
    }
}

/// One client's live interest in a target. Dropping it closes the
/// subscription as a client disconnect.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    target: WatchTarget,
    events: mpsc::Receiver<DomainEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Next event, or `None` once the registry has detached this subscriber.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.events.recv().await
    }

    /// Close with an explicit reason instead of `ClientDisconnect`.
    pub fn close(self, reason: CloseReason) -> bool {
        self.guard.manager.close(self.id, reason)
    }

    /// Event stream that keeps the subscription open for as long as it is
    /// polled and closes it when dropped.
    pub fn into_stream(self) -> impl Stream<Item = DomainEvent> + Send + 'static {
        let Subscription {
            mut events, guard, ..
        } = self;
        async_stream::stream! {
            let _guard = guard;
            while let Some(event) = events.recv().await {
                yield event;
            }
        }
    }
}
