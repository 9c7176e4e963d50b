//! OS watch backends.
//!
//! A backend turns one [`WatchTarget`] into a live OS subscription that feeds
//! raw events into the registry through a [`RawEventSink`]. The returned
//! handle owns the subscription; dropping it releases the OS resources.

use std::fmt;
use std::path::Path;

use notify::event::{CreateKind, EventKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{Result, WatchError};
use crate::events::{RawEvent, RawKind};
use crate::registry::RegistryCommand;
use crate::target::{TargetKey, WatchTarget};

/// Live OS subscription. Released on drop.
pub trait WatchHandle: Send {}

pub trait WatchBackend: Send + Sync + 'static {
    /// Start observing `target`. Called from a blocking context.
    fn start(&self, target: &WatchTarget, sink: RawEventSink) -> Result<Box<dyn WatchHandle>>;
}

/// Delivers raw events for one target into the registry mailbox.
#[derive(Clone)]
pub struct RawEventSink {
    target: TargetKey,
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl fmt::Debug for RawEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEventSink")
            .field("target", &self.target)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl RawEventSink {
    pub(crate) fn new(target: TargetKey, tx: mpsc::UnboundedSender<RegistryCommand>) -> Self {
        Self { target, tx }
    }

    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    /// Returns `false` once the registry has stopped.
    pub fn send(&self, raw: RawEvent) -> bool {
        self.tx
            .send(RegistryCommand::Dispatch {
                target: self.target.clone(),
                raw,
            })
            .is_ok()
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(RegistryCommand::BackendError {
                target: self.target.clone(),
                message: message.into(),
            })
            .is_ok()
    }
}

/// Native notifications through `notify`'s recommended watcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

struct NotifyHandle {
    _watcher: RecommendedWatcher,
}

impl WatchHandle for NotifyHandle {}

impl WatchBackend for NotifyBackend {
    fn start(&self, target: &WatchTarget, sink: RawEventSink) -> Result<Box<dyn WatchHandle>> {
        let watch_root = target.watch_root().to_path_buf();
        let mode = if target.is_recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let scope = target.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in translate(&event) {
                        if !scope.covers(&raw.path) {
                            continue;
                        }
                        trace!(path = %raw.path.display(), kind = ?raw.kind, "raw fs event");
                        if !sink.send(raw) {
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(watch = %sink.target(), "watcher error: {}", err);
                    sink.error(err.to_string());
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| WatchError::WatchStartFailed {
            path: watch_root.clone(),
            message: err.to_string(),
        })?;

        watcher
            .watch(&watch_root, mode)
            .map_err(|err| WatchError::WatchStartFailed {
                path: watch_root.clone(),
                message: err.to_string(),
            })?;

        Ok(Box::new(NotifyHandle { _watcher: watcher }))
    }
}

/// Flatten one notify event into per-path raw events.
pub fn translate(event: &Event) -> Vec<RawEvent> {
    let paths = &event.paths;
    match event.kind {
        EventKind::Create(CreateKind::Folder) => {
            paths.iter().map(|p| RawEvent::dir(p, RawKind::Created)).collect()
        }
        EventKind::Create(_) => paths.iter().map(|p| observed(p, RawKind::Created)).collect(),
        EventKind::Modify(
            ModifyKind::Data(_)
            | ModifyKind::Any
            | ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any),
        ) => paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| RawEvent::new(p, RawKind::Modified))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(|p| RawEvent::new(p, RawKind::Removed)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().map(|p| observed(p, RawKind::Created)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.first() {
                out.push(RawEvent::new(from, RawKind::Removed));
            }
            if let Some(to) = paths.get(1) {
                out.push(observed(to, RawKind::Created));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    observed(p, RawKind::Created)
                } else {
                    RawEvent::new(p, RawKind::Removed)
                }
            })
            .collect(),
        EventKind::Remove(RemoveKind::Folder) => {
            paths.iter().map(|p| RawEvent::dir(p, RawKind::Removed)).collect()
        }
        EventKind::Remove(_) => paths.iter().map(|p| RawEvent::new(p, RawKind::Removed)).collect(),
        _ => Vec::new(),
    }
}

fn observed(path: &Path, kind: RawKind) -> RawEvent {
    if path.is_dir() {
        RawEvent::dir(path, kind)
    } else {
        RawEvent::new(path, kind)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod manual {
    //! In-memory backend for driving the registry deterministically.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dashmap::DashMap;

    use super::*;

    #[derive(Debug, Default)]
    struct Inner {
        starts: AtomicUsize,
        releases: AtomicUsize,
        sinks: DashMap<TargetKey, RawEventSink>,
        failure: Option<String>,
    }

    /// Records start/release calls and lets tests inject raw events.
    #[derive(Debug, Default, Clone)]
    pub struct ManualBackend {
        inner: Arc<Inner>,
    }

    struct ManualHandle {
        key: TargetKey,
        inner: Arc<Inner>,
    }

    impl WatchHandle for ManualHandle {}

    impl Drop for ManualHandle {
        fn drop(&mut self) {
            self.inner.sinks.remove(&self.key);
            self.inner.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ManualBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Backend whose every start attempt fails with `message`.
        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                inner: Arc::new(Inner {
                    failure: Some(message.into()),
                    ..Inner::default()
                }),
            }
        }

        pub fn starts(&self) -> usize {
            self.inner.starts.load(Ordering::SeqCst)
        }

        pub fn releases(&self) -> usize {
            self.inner.releases.load(Ordering::SeqCst)
        }

        /// Inject `raw` as if the OS reported it for `target`. Returns `false`
        /// when no watch is active for the target.
        pub fn emit(&self, target: &WatchTarget, raw: RawEvent) -> bool {
            let Some(sink) = self.inner.sinks.get(&target.key()) else {
                return false;
            };
            if !target.covers(&raw.path) {
                return true;
            }
            sink.send(raw)
        }

        pub fn emit_error(&self, target: &WatchTarget, message: &str) -> bool {
            self.inner
                .sinks
                .get(&target.key())
                .is_some_and(|sink| sink.error(message))
        }
    }

    impl WatchBackend for ManualBackend {
        fn start(
            &self,
            target: &WatchTarget,
            sink: RawEventSink,
        ) -> Result<Box<dyn WatchHandle>> {
            if let Some(message) = &self.inner.failure {
                return Err(WatchError::WatchStartFailed {
                    path: target.watch_root().to_path_buf(),
                    message: message.clone(),
                });
            }

            let key = target.key();
            self.inner.starts.fetch_add(1, Ordering::SeqCst);
            self.inner.sinks.insert(key.clone(), sink);
            Ok(Box::new(ManualHandle {
                key,
                inner: Arc::clone(&self.inner),
            }))
        }
    }
}
