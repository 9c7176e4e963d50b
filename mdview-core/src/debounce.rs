//! Per-path coalescing of raw events.
//!
//! Every `(target, path)` pair owns at most one pending timer. A burst of
//! raw events on the same path collapses into a single event that fires
//! once the path has been quiet for the configured period. Single files can
//! additionally be held back until their size and mtime stop moving, which
//! hides half-written saves from clients.

use std::collections::HashMap;
use std::future::poll_fn;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;
use tracing::trace;

use crate::events::{RawEvent, RawKind};
use crate::target::{TargetKey, TargetKind, WatchTarget};

/// Settle window before a file event is considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStability {
    pub threshold: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    pub quiet_period: Duration,
    pub stability: Option<WriteStability>,
}

impl DebouncePolicy {
    pub fn quiet(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            stability: None,
        }
    }
}

/// Identity of one pending timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerSlot {
    pub target: TargetKey,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    async fn read(path: &std::path::Path) -> Option<Self> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Polling size/mtime until they hold still for the stability threshold.
    Settling {
        fingerprint: Option<Fingerprint>,
        stable_for: Duration,
    },
    /// Waiting out the quiet period.
    Quiet,
}

#[derive(Debug)]
struct PendingTimer {
    key: Key,
    kind: RawKind,
    is_dir: bool,
    phase: Phase,
}

/// Owns every pending timer across all watch entries.
#[derive(Debug)]
pub struct Debouncer {
    policy: DebouncePolicy,
    queue: DelayQueue<TimerSlot>,
    pending: HashMap<TimerSlot, PendingTimer>,
}

impl Debouncer {
    pub fn new(policy: DebouncePolicy) -> Self {
        Self {
            policy,
            queue: DelayQueue::new(),
            pending: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fold `raw` into the pending timer for its path.
    ///
    /// Returns an event that had to be flushed early because the new raw
    /// kind could not be merged into it.
    pub fn debounce(&mut self, target: &WatchTarget, raw: RawEvent) -> Option<RawEvent> {
        let slot = TimerSlot {
            target: target.key(),
            path: raw.path.clone(),
        };

        let Some(existing) = self.pending.get_mut(&slot) else {
            self.arm(target, slot, raw);
            return None;
        };

        match merge(existing.kind, raw.kind) {
            Some(kind) => {
                existing.kind = kind;
                existing.is_dir |= raw.is_dir;
                match &mut existing.phase {
                    Phase::Quiet => {
                        self.queue.reset(&existing.key, self.policy.quiet_period);
                    }
                    Phase::Settling {
                        fingerprint,
                        stable_for,
                    } => {
                        // Keep the poll cadence; only the stability clock restarts.
                        *fingerprint = None;
                        *stable_for = Duration::ZERO;
                    }
                }
                None
            }
            None => {
                let flushed = self.take(&slot);
                self.arm(target, slot, raw);
                flushed
            }
        }
    }

    /// Drop every pending timer owned by `target`. Returns how many were
    /// cancelled.
    pub fn cancel_all(&mut self, target: &TargetKey) -> usize {
        let slots: Vec<TimerSlot> = self
            .pending
            .keys()
            .filter(|slot| &slot.target == target)
            .cloned()
            .collect();
        for slot in &slots {
            self.take(slot);
        }
        slots.len()
    }

    /// Wait for the next timer to fire. Resolves to `None` immediately when
    /// nothing is pending; callers should guard on [`Debouncer::is_idle`].
    pub async fn next_expired(&mut self) -> Option<TimerSlot> {
        poll_fn(|cx| self.queue.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }

    /// Advance the timer behind `slot` after it fired. Returns the coalesced
    /// event once the path is both settled and quiet.
    pub async fn on_expired(&mut self, slot: TimerSlot) -> Option<RawEvent> {
        let policy = self.policy;
        let Phase::Settling {
            fingerprint,
            stable_for,
        } = self.pending.get(&slot)?.phase
        else {
            let pending = self.pending.remove(&slot)?;
            return Some(RawEvent {
                path: slot.path,
                kind: pending.kind,
                is_dir: pending.is_dir,
            });
        };

        let (phase, delay) = match policy.stability {
            None => (Phase::Quiet, policy.quiet_period),
            Some(stability) => match Fingerprint::read(&slot.path).await {
                // Unreadable: stop polling and let the classifier decide.
                None => (Phase::Quiet, policy.quiet_period),
                Some(current) if fingerprint == Some(current) => {
                    let stable_for = stable_for + stability.poll_interval;
                    if stable_for >= stability.threshold {
                        (Phase::Quiet, policy.quiet_period)
                    } else {
                        (
                            Phase::Settling {
                                fingerprint: Some(current),
                                stable_for,
                            },
                            stability.poll_interval,
                        )
                    }
                }
                Some(current) => (
                    Phase::Settling {
                        fingerprint: Some(current),
                        stable_for: Duration::ZERO,
                    },
                    stability.poll_interval,
                ),
            },
        };

        trace!(path = %slot.path.display(), settled = matches!(phase, Phase::Quiet), "write stability poll");
        let pending = self.pending.get_mut(&slot)?;
        pending.phase = phase;
        pending.key = self.queue.insert(slot, delay);
        None
    }

    fn arm(&mut self, target: &WatchTarget, slot: TimerSlot, raw: RawEvent) {
        let settle = self.policy.stability.filter(|_| {
            target.kind() == TargetKind::SingleFile && raw.kind != RawKind::Removed && !raw.is_dir
        });

        let (phase, delay) = match settle {
            Some(stability) => (
                Phase::Settling {
                    fingerprint: None,
                    stable_for: Duration::ZERO,
                },
                stability.poll_interval,
            ),
            None => (Phase::Quiet, self.policy.quiet_period),
        };

        let key = self.queue.insert(slot.clone(), delay);
        self.pending.insert(
            slot,
            PendingTimer {
                key,
                kind: raw.kind,
                is_dir: raw.is_dir,
                phase,
            },
        );
    }

    fn take(&mut self, slot: &TimerSlot) -> Option<RawEvent> {
        let pending = self.pending.remove(slot)?;
        self.queue.remove(&pending.key);
        Some(RawEvent {
            path: slot.path.clone(),
            kind: pending.kind,
            is_dir: pending.is_dir,
        })
    }
}

/// Combine a pending kind with a newly observed one, or `None` when the two
/// must be delivered separately.
fn merge(pending: RawKind, incoming: RawKind) -> Option<RawKind> {
    match (pending, incoming) {
        (a, b) if a == b => Some(a),
        // Atomic save: unlink followed by a fresh file at the same path.
        (RawKind::Removed, RawKind::Created) => Some(RawKind::Modified),
        (RawKind::Created, RawKind::Modified) => Some(RawKind::Created),
        (RawKind::Modified, RawKind::Created) => Some(RawKind::Modified),
        _ => None,
    }
}
