//! Reference-counted watch registry.
//!
//! One actor task owns every watch entry, the shared debouncer and all
//! subscriber senders. Callers talk to it through the cloneable
//! [`WatchRegistry`] handle; raw OS events arrive on the same mailbox through
//! [`RawEventSink`]s. Because all mutation happens on one task, starting a
//! watch, attaching a subscriber and tearing a watch down can never
//! interleave, so at most one OS watch exists per target key.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, info, trace, warn};

use crate::backend::{RawEventSink, WatchBackend, WatchHandle};
use crate::classify::{Classification, EntryLedger, EventClassifier, last_modified};
use crate::config::FsWatchConfig;
use crate::debounce::{Debouncer, TimerSlot};
use crate::error::{Result, WatchError};
use crate::events::{DomainEvent, RawEvent, RawKind, SubscriberId};
use crate::target::{TargetKey, TargetKind, WatchTarget};

/// Messages understood by the registry actor.
#[derive(Debug)]
pub enum RegistryCommand {
    Acquire {
        target: WatchTarget,
        subscriber: SubscriberId,
        sender: mpsc::Sender<DomainEvent>,
        /// Delivered to `sender` before any change event.
        greeting: DomainEvent,
        reply: oneshot::Sender<Result<AcquireOutcome>>,
    },
    Release {
        target: TargetKey,
        subscriber: SubscriberId,
    },
    Dispatch {
        target: TargetKey,
        raw: RawEvent,
    },
    BackendError {
        target: TargetKey,
        message: String,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// Whether this acquire started a new OS watch.
    pub created: bool,
    /// Subscribers on the entry after this acquire.
    pub subscribers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStats {
    pub key: TargetKey,
    pub kind: TargetKind,
    pub subscribers: usize,
    pub known_sessions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub entries: usize,
    pub subscribers: usize,
    pub pending_timers: usize,
    pub targets: Vec<TargetStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub entries: usize,
    pub subscribers: usize,
}

/// Handle to the registry actor.
#[derive(Clone)]
pub struct WatchRegistry {
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WatchRegistry {
    /// Spawn the registry actor on the current runtime.
    pub fn spawn(
        config: &FsWatchConfig,
        backend: Arc<dyn WatchBackend>,
        classifier: EventClassifier,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RegistryActor {
            backend,
            classifier,
            debouncer: Debouncer::new(config.debounce_policy()),
            entries: HashMap::new(),
            sink_tx: tx.downgrade(),
            rx,
        };
        let task = tokio::spawn(actor.run());
        (Self { tx }, task)
    }

    /// Attach `subscriber` to the watch for `target`, starting the OS watch
    /// if this is the first subscriber.
    pub async fn acquire(
        &self,
        target: WatchTarget,
        subscriber: SubscriberId,
        sender: mpsc::Sender<DomainEvent>,
        greeting: DomainEvent,
    ) -> Result<AcquireOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Acquire {
                target,
                subscriber,
                sender,
                greeting,
                reply,
            })
            .map_err(|_| WatchError::RegistryClosed)?;
        rx.await.map_err(|_| WatchError::RegistryClosed)?
    }

    /// Detach `subscriber`. Unknown subscribers are ignored. Returns `false`
    /// only when the registry has already stopped.
    pub fn release(&self, target: &TargetKey, subscriber: SubscriberId) -> bool {
        self.tx
            .send(RegistryCommand::Release {
                target: target.clone(),
                subscriber,
            })
            .is_ok()
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Stats { reply })
            .map_err(|_| WatchError::RegistryClosed)?;
        rx.await.map_err(|_| WatchError::RegistryClosed)
    }

    /// Release every watch and stop the actor.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Shutdown { reply })
            .map_err(|_| WatchError::RegistryClosed)?;
        rx.await.map_err(|_| WatchError::RegistryClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct WatchEntry {
    target: WatchTarget,
    /// Dropped exactly once, when the entry leaves the map.
    _handle: Box<dyn WatchHandle>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<DomainEvent>>,
    ledger: EntryLedger,
}

impl fmt::Debug for WatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEntry")
            .field("target", &self.target)
            .field("subscribers", &self.subscribers.len())
            .field("known_sessions", &self.ledger.known_sessions())
            .finish()
    }
}

enum Wake {
    Timer(Option<TimerSlot>),
    Command(Option<RegistryCommand>),
}

struct RegistryActor {
    backend: Arc<dyn WatchBackend>,
    classifier: EventClassifier,
    debouncer: Debouncer,
    entries: HashMap<TargetKey, WatchEntry>,
    sink_tx: mpsc::WeakUnboundedSender<RegistryCommand>,
    rx: mpsc::UnboundedReceiver<RegistryCommand>,
}

impl RegistryActor {
    async fn run(mut self) {
        debug!("watch registry started");

        loop {
            let wake = tokio::select! {
                biased;
                slot = self.debouncer.next_expired(), if !self.debouncer.is_idle() => Wake::Timer(slot),
                command = self.rx.recv() => Wake::Command(command),
            };

            match wake {
                Wake::Timer(Some(slot)) => self.on_timer(slot).await,
                Wake::Timer(None) => {}
                Wake::Command(Some(command)) => {
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                Wake::Command(None) => {
                    self.teardown_all();
                    break;
                }
            }
        }

        debug!("watch registry stopped");
    }

    async fn handle(&mut self, command: RegistryCommand) -> ControlFlow<()> {
        match command {
            RegistryCommand::Acquire {
                target,
                subscriber,
                sender,
                greeting,
                reply,
            } => {
                let outcome = self.acquire(target, subscriber, sender, greeting).await;
                let _ = reply.send(outcome);
            }
            RegistryCommand::Release { target, subscriber } => {
                self.remove_subscriber(&target, subscriber);
            }
            RegistryCommand::Dispatch { target, raw } => self.dispatch(&target, raw).await,
            RegistryCommand::BackendError { target, message } => {
                if self.entries.contains_key(&target) {
                    warn!(watch = %target, "watch backend reported an error: {}", message);
                    self.fan_out(&target, DomainEvent::error(message));
                }
            }
            RegistryCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            RegistryCommand::Shutdown { reply } => {
                let _ = reply.send(self.teardown_all());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn acquire(
        &mut self,
        target: WatchTarget,
        subscriber: SubscriberId,
        sender: mpsc::Sender<DomainEvent>,
        greeting: DomainEvent,
    ) -> Result<AcquireOutcome> {
        let key = target.key();
        let created = !self.entries.contains_key(&key);
        if created {
            let tx = self.sink_tx.upgrade().ok_or(WatchError::RegistryClosed)?;
            let sink = RawEventSink::new(key.clone(), tx);
            let entry = start_entry(
                Arc::clone(&self.backend),
                self.classifier.clone(),
                sink,
                target,
            )
            .await?;
            self.entries.insert(key.clone(), entry);
        }

        let Some(entry) = self.entries.get_mut(&key) else {
            return Err(WatchError::RegistryClosed);
        };

        if sender.try_send(greeting).is_err() {
            debug!(%subscriber, watch = %key, "subscriber went away before it was attached");
            if entry.subscribers.is_empty() {
                self.teardown(&key);
            }
            return Err(WatchError::ChannelClosed);
        }

        entry.subscribers.insert(subscriber, sender);
        let subscribers = entry.subscribers.len();
        debug!(%subscriber, watch = %key, subscribers, "subscriber attached");

        Ok(AcquireOutcome {
            created,
            subscribers,
        })
    }

    async fn dispatch(&mut self, key: &TargetKey, raw: RawEvent) {
        let flushed = {
            let Some(entry) = self.entries.get(key) else {
                trace!(watch = %key, path = %raw.path.display(), "raw event for released watch");
                return;
            };

            if let Err(reason) = self.classifier.admits(&entry.target, &raw) {
                trace!(path = %raw.path.display(), %reason, "raw event filtered");
                return;
            }

            self.debouncer.debounce(&entry.target, raw)
        };

        if let Some(flushed) = flushed {
            self.deliver(key, flushed).await;
        }
    }

    async fn on_timer(&mut self, slot: TimerSlot) {
        let key = slot.target.clone();
        if let Some(raw) = self.debouncer.on_expired(slot).await {
            self.deliver(&key, raw).await;
        }
    }

    async fn deliver(&mut self, key: &TargetKey, raw: RawEvent) {
        if !self.entries.contains_key(key) {
            return;
        }
        let modified = if raw.kind == RawKind::Removed || raw.is_dir {
            None
        } else {
            last_modified(&raw.path).await
        };

        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        match self
            .classifier
            .classify(&entry.target, &mut entry.ledger, &raw, modified)
        {
            Classification::Events(events) => {
                for event in events {
                    debug!(watch = %key, event = event.event_type(), path = %raw.path.display(), "change detected");
                    self.fan_out(key, event);
                }
            }
            Classification::Filtered(reason) => {
                debug!(watch = %key, path = %raw.path.display(), %reason, "change filtered");
            }
        }
    }

    /// Deliver `event` to every subscriber of `key`. A subscriber whose
    /// channel is closed or full is detached; the others are unaffected.
    fn fan_out(&mut self, key: &TargetKey, event: DomainEvent) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };

        let mut failed = Vec::new();
        for (id, sender) in &entry.subscribers {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, watch = %key, "subscriber is not keeping up; detaching");
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, watch = %key, "subscriber channel closed");
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            self.remove_subscriber(key, id);
        }
    }

    fn remove_subscriber(&mut self, key: &TargetKey, subscriber: SubscriberId) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.subscribers.remove(&subscriber).is_none() {
            return;
        }

        debug!(%subscriber, watch = %key, remaining = entry.subscribers.len(), "subscriber detached");
        if entry.subscribers.is_empty() {
            self.teardown(key);
        }
    }

    fn teardown(&mut self, key: &TargetKey) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        let cancelled = self.debouncer.cancel_all(key);
        info!(
            watch = %key,
            root = %entry.target.watch_root().display(),
            cancelled_timers = cancelled,
            "watch released"
        );
    }

    fn teardown_all(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let keys: Vec<TargetKey> = self.entries.keys().cloned().collect();
        for key in keys {
            if let Some(entry) = self.entries.get(&key) {
                report.entries += 1;
                report.subscribers += entry.subscribers.len();
            }
            self.teardown(&key);
        }
        report
    }

    fn stats(&self) -> RegistryStats {
        let mut targets: Vec<TargetStats> = self
            .entries
            .iter()
            .map(|(key, entry)| TargetStats {
                key: key.clone(),
                kind: entry.target.kind(),
                subscribers: entry.subscribers.len(),
                known_sessions: entry.ledger.known_sessions(),
            })
            .collect();
        targets.sort_by(|a, b| a.key.cmp(&b.key));

        RegistryStats {
            entries: self.entries.len(),
            subscribers: targets.iter().map(|t| t.subscribers).sum(),
            pending_timers: self.debouncer.len(),
            targets,
        }
    }
}

/// Seed the entry ledger and start the OS watch on the blocking pool.
async fn start_entry(
    backend: Arc<dyn WatchBackend>,
    classifier: EventClassifier,
    sink: RawEventSink,
    target: WatchTarget,
) -> Result<WatchEntry> {
    let key = target.key();
    let blocking_target = target.clone();
    let started = spawn_blocking(move || {
        // Seed first: a session created after seeding but before the watch
        // is live is still announced by its first file event.
        let ledger = classifier.seed(&blocking_target);
        backend
            .start(&blocking_target, sink)
            .map(|handle| (handle, ledger))
    })
    .await
    .map_err(|join_err| WatchError::WatchStartFailed {
        path: target.watch_root().to_path_buf(),
        message: format!("watch initialization panicked: {join_err}"),
    })?;

    let (handle, ledger) = match started {
        Ok(started) => started,
        Err(err) => {
            warn!(watch = %key, "failed to start watch: {}", err);
            return Err(err);
        }
    };

    info!(
        watch = %key,
        root = %target.watch_root().display(),
        known_sessions = ledger.known_sessions(),
        "watch started"
    );

    Ok(WatchEntry {
        target,
        _handle: handle,
        subscribers: HashMap::new(),
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::manual::ManualBackend;
    use crate::events::{EventPayload, RawKind};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::{Instant, sleep, timeout};

    const SESSION: &str = "0b6f3c1e-8a4d-4b8e-9c3a-2f1d5e7a9b10";

    fn quiet_config() -> FsWatchConfig {
        FsWatchConfig {
            quiet_period: Duration::from_millis(300),
            write_stability: None,
            channel_capacity: 16,
            keep_alive: Duration::from_secs(15),
        }
    }

    fn spawn(backend: &ManualBackend) -> WatchRegistry {
        let (registry, _task) = WatchRegistry::spawn(
            &quiet_config(),
            Arc::new(backend.clone()),
            EventClassifier::default(),
        );
        registry
    }

    async fn subscribe(
        registry: &WatchRegistry,
        target: &WatchTarget,
        capacity: usize,
    ) -> (SubscriberId, mpsc::Receiver<DomainEvent>, AcquireOutcome) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(capacity);
        let outcome = registry
            .acquire(
                target.clone(),
                id,
                tx,
                DomainEvent::connected(id, Some(target.label().to_string()), None),
            )
            .await
            .unwrap();
        (id, rx, outcome)
    }

    fn markdown_file(dir: &tempfile::TempDir, name: &str) -> (PathBuf, WatchTarget) {
        let path = dir.path().join(name);
        std::fs::write(&path, "# doc").unwrap();
        let target = WatchTarget::single_file(path.clone(), name);
        (path, target)
    }

    #[tokio::test]
    async fn one_os_watch_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let (_, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);

        let (first, _rx1, outcome1) = subscribe(&registry, &target, 4).await;
        let (second, _rx2, outcome2) = subscribe(&registry, &target, 4).await;
        assert!(outcome1.created);
        assert!(!outcome2.created);
        assert_eq!(outcome2.subscribers, 2);
        assert_eq!(backend.starts(), 1);

        registry.release(&target.key(), first);
        registry.stats().await.unwrap();
        assert_eq!(backend.releases(), 0);

        registry.release(&target.key(), second);
        let stats = registry.stats().await.unwrap();
        assert_eq!(backend.releases(), 1);
        assert_eq!(stats.entries, 0);

        // Releasing again is a no-op.
        registry.release(&target.key(), second);
        registry.stats().await.unwrap();
        assert_eq!(backend.releases(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_share_a_watch() {
        let dir = tempfile::tempdir().unwrap();
        let (_, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let target = target.clone();
            tasks.push(tokio::spawn(async move {
                let (_, rx, _) = subscribe(&registry, &target, 4).await;
                rx
            }));
        }
        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }

        assert_eq!(backend.starts(), 1);
        assert_eq!(registry.stats().await.unwrap().subscribers, 8);
    }

    #[tokio::test]
    async fn greeting_precedes_change_events() {
        let dir = tempfile::tempdir().unwrap();
        let (path, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);

        let (id, mut rx, _) = subscribe(&registry, &target, 4).await;
        assert!(backend.emit(&target, RawEvent::new(&path, RawKind::Modified)));

        let first = rx.recv().await.unwrap();
        match first.payload {
            EventPayload::Connected(data) => assert_eq!(data.subscriber_id, id),
            other => panic!("expected greeting, got {other:?}"),
        }
        let second = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.event_type(), "file:changed");
        assert_eq!(second.payload.file_path(), Some("a.md"));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_writes_produce_one_notification() {
        let dir = tempfile::tempdir().unwrap();
        let (path, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (_, mut rx, _) = subscribe(&registry, &target, 16).await;
        rx.recv().await.unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            backend.emit(&target, RawEvent::new(&path, RawKind::Modified));
            sleep(Duration::from_millis(50)).await;
        }

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "file:changed");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(520), "{elapsed:?}");

        assert!(timeout(Duration::from_secs(2), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn rename_save_over_a_watched_file_is_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let (path, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (_, mut rx, _) = subscribe(&registry, &target, 8).await;
        rx.recv().await.unwrap();

        // Editors that write a temp file and rename it into place only
        // report a create for the target path.
        std::fs::write(&path, "# replaced").unwrap();
        backend.emit(&target, RawEvent::new(&path, RawKind::Created));
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "file:changed");

        // After a deletion the next create is a real creation.
        std::fs::remove_file(&path).unwrap();
        backend.emit(&target, RawEvent::new(&path, RawKind::Removed));
        let deleted = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deleted.event_type(), "file:deleted");

        std::fs::write(&path, "# back").unwrap();
        backend.emit(&target, RawEvent::new(&path, RawKind::Created));
        let created = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.event_type(), "file:created");
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let (path, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);

        // Capacity one: the greeting fills the buffer and is never read.
        let (_, _stuck_rx, _) = subscribe(&registry, &target, 1).await;
        let (_, mut healthy_rx, _) = subscribe(&registry, &target, 8).await;
        healthy_rx.recv().await.unwrap();

        backend.emit(&target, RawEvent::new(&path, RawKind::Modified));
        let event = timeout(Duration::from_secs(5), healthy_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "file:changed");

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(backend.releases(), 0);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned_and_last_one_releases_the_watch() {
        let dir = tempfile::tempdir().unwrap();
        let (path, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);

        let (_, rx, _) = subscribe(&registry, &target, 4).await;
        drop(rx);
        backend.emit(&target, RawEvent::new(&path, RawKind::Modified));

        timeout(Duration::from_secs(5), async {
            while backend.releases() == 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.stats().await.unwrap().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn releasing_the_last_subscriber_cancels_pending_timers() {
        let dir = tempfile::tempdir().unwrap();
        let (path, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (id, _rx, _) = subscribe(&registry, &target, 4).await;

        backend.emit(&target, RawEvent::new(&path, RawKind::Modified));
        assert_eq!(registry.stats().await.unwrap().pending_timers, 1);

        registry.release(&target.key(), id);
        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.pending_timers, 0);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn failed_start_leaves_no_entry() {
        let backend = ManualBackend::failing("inotify limit reached");
        let registry = spawn(&backend);
        let target = WatchTarget::single_file(PathBuf::from("/wiki/a.md"), "a.md");
        let id = SubscriberId::new();
        let (tx, _rx) = mpsc::channel(4);

        let err = registry
            .acquire(target, id, tx, DomainEvent::connected(id, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::WatchStartFailed { .. }));
        assert_eq!(registry.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn subscriber_gone_before_attach_does_not_leak_a_watch() {
        let dir = tempfile::tempdir().unwrap();
        let (_, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let err = registry
            .acquire(target, id, tx, DomainEvent::connected(id, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::ChannelClosed));
        assert_eq!(backend.starts(), 1);
        assert_eq!(backend.releases(), 1);
    }

    #[tokio::test]
    async fn backend_errors_reach_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let (_, target) = markdown_file(&dir, "a.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (_, mut rx, _) = subscribe(&registry, &target, 4).await;
        rx.recv().await.unwrap();

        assert!(backend.emit_error(&target, "watch queue overflowed"));
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "error");
    }

    #[tokio::test]
    async fn session_subtree_announces_new_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let target = WatchTarget::subtree(root.clone(), 3);
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (_, mut rx, _) = subscribe(&registry, &target, 8).await;
        rx.recv().await.unwrap();

        let session = root.join(SESSION);
        std::fs::create_dir(&session).unwrap();
        backend.emit(&target, RawEvent::dir(&session, RawKind::Created));
        backend.emit(&target, RawEvent::new(session.join("events.jsonl"), RawKind::Created));

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "session:created");
        assert!(timeout(Duration::from_millis(800), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn file_in_unseen_session_reports_session_then_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let target = WatchTarget::subtree(root.clone(), 3);
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (_, mut rx, _) = subscribe(&registry, &target, 8).await;
        rx.recv().await.unwrap();

        let session = root.join(SESSION);
        std::fs::create_dir(&session).unwrap();
        let plan = session.join("plan.md");
        std::fs::write(&plan, "# plan").unwrap();
        // Only the file event arrives; the directory event was lost.
        backend.emit(&target, RawEvent::new(&plan, RawKind::Created));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert_eq!(seen[0].event_type(), "session:created");
        assert_eq!(seen[1].event_type(), "file:created");
        assert_eq!(
            seen[1].payload.file_path(),
            Some(format!("{SESSION}/plan.md").as_str())
        );
    }

    #[tokio::test]
    async fn shutdown_stops_the_actor_task() {
        let backend = ManualBackend::new();
        let (registry, task) = WatchRegistry::spawn(
            &quiet_config(),
            Arc::new(backend.clone()),
            EventClassifier::default(),
        );

        registry.shutdown().await.unwrap();
        timeout(Duration::from_secs(5), task)
            .await
            .expect("actor should exit after shutdown")
            .unwrap();
        assert!(registry.is_closed());
        assert!(matches!(
            registry.stats().await.unwrap_err(),
            WatchError::RegistryClosed
        ));
    }

    #[test]
    fn actor_future_can_move_between_threads() {
        fn assert_send<T: Send>(_: &T) {}

        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RegistryActor {
            backend: Arc::new(ManualBackend::new()),
            classifier: EventClassifier::default(),
            debouncer: Debouncer::new(quiet_config().debounce_policy()),
            entries: HashMap::new(),
            sink_tx: tx.downgrade(),
            rx,
        };
        assert_send(&actor.run());
    }

    #[tokio::test]
    async fn shutdown_releases_everything_and_closes_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (_, first) = markdown_file(&dir, "a.md");
        let (_, second) = markdown_file(&dir, "b.md");
        let backend = ManualBackend::new();
        let registry = spawn(&backend);
        let (_, mut rx, _) = subscribe(&registry, &first, 4).await;
        subscribe(&registry, &second, 4).await;

        let report = registry.shutdown().await.unwrap();
        assert_eq!(report.entries, 2);
        assert_eq!(report.subscribers, 2);
        assert_eq!(backend.releases(), 2);

        // Greeting, then the channel ends because the sender was dropped.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());

        let id = SubscriberId::new();
        let (tx, _rx) = mpsc::channel(4);
        let err = registry
            .acquire(first, id, tx, DomainEvent::connected(id, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::RegistryClosed));
    }
}
