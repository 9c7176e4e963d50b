//! Turns coalesced raw filesystem events into [`DomainEvent`]s.
//!
//! Classification never fails: anything that cannot be mapped to a domain
//! event is reported as [`Classification::Filtered`] with a reason that is
//! only ever logged. The classifier never touches the disk on the event path;
//! the caller stats the changed path and passes the modification time in.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::events::{DomainEvent, EventPayload, FileData, RawEvent, RawKind, SessionData};
use crate::path::{display_relative, has_markdown_extension};
use crate::target::{TargetKind, WatchTarget};

/// Session directories are named by UUID.
static SESSION_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("session id pattern is valid")
});

/// Housekeeping files written by the session corpus producer.
pub const DEFAULT_IGNORED_FILES: &[&str] =
    &["events.jsonl", "workspace.yaml", "workspace.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    OutsideTarget,
    Hidden,
    NotMarkdown,
    Ignored,
    Directory,
    TooDeep,
    UnrecognizedEntry,
    KnownSession,
    StatFailed,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FilterReason::OutsideTarget => "outside_target",
            FilterReason::Hidden => "hidden",
            FilterReason::NotMarkdown => "not_markdown",
            FilterReason::Ignored => "ignored",
            FilterReason::Directory => "directory",
            FilterReason::TooDeep => "too_deep",
            FilterReason::UnrecognizedEntry => "unrecognized_entry",
            FilterReason::KnownSession => "known_session",
            FilterReason::StatFailed => "stat_failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// One or more events, in delivery order.
    Events(Vec<DomainEvent>),
    Filtered(FilterReason),
}

/// What one watch entry remembers between events.
#[derive(Debug, Default, Clone)]
pub struct EntryLedger {
    /// Top-level session directories already announced (subtree watches).
    sessions: HashSet<String>,
    /// Whether the watched file exists (single-file watches). A create on a
    /// present file is a replace, which is how rename-based saves arrive.
    file_present: bool,
}

impl EntryLedger {
    pub fn known_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn knows_session(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }

    pub fn file_present(&self) -> bool {
        self.file_present
    }
}

#[derive(Debug)]
struct ClassifierRules {
    ignored_files: Vec<String>,
    session_pattern: Regex,
}

/// Shared, cheaply cloneable classifier configuration.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    rules: Arc<ClassifierRules>,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_FILES.iter().map(|name| name.to_string()))
    }
}

impl EventClassifier {
    pub fn new<I>(ignored_files: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            rules: Arc::new(ClassifierRules {
                ignored_files: ignored_files.into_iter().collect(),
                session_pattern: SESSION_ID_PATTERN.clone(),
            }),
        }
    }

    /// Cheap path-only screening applied before an event is debounced, so
    /// noise never occupies a timer.
    pub fn admits(&self, target: &WatchTarget, raw: &RawEvent) -> Result<(), FilterReason> {
        if !target.covers(&raw.path) {
            return Err(FilterReason::OutsideTarget);
        }

        match target.kind() {
            TargetKind::SingleFile => Ok(()),
            TargetKind::DirectorySubtree => {
                let segments = relative_segments(target.root_path(), &raw.path)
                    .ok_or(FilterReason::OutsideTarget)?;
                if let Some(max_depth) = target.max_depth()
                    && segments.len() > max_depth
                {
                    return Err(FilterReason::TooDeep);
                }
                if segments.iter().any(|segment| segment.starts_with('.')) {
                    return Err(FilterReason::Hidden);
                }
                if !self.rules.session_pattern.is_match(&segments[0]) {
                    return Err(FilterReason::UnrecognizedEntry);
                }
                if segments.len() == 1 {
                    return Ok(());
                }
                self.screen_file_name(raw)
            }
        }
    }

    /// Map one coalesced raw event to domain events. `modified` is the
    /// changed path's modification time, or `None` when it could not be read.
    pub fn classify(
        &self,
        target: &WatchTarget,
        ledger: &mut EntryLedger,
        raw: &RawEvent,
        modified: Option<DateTime<Utc>>,
    ) -> Classification {
        if let Err(reason) = self.admits(target, raw) {
            return Classification::Filtered(reason);
        }

        match target.kind() {
            TargetKind::SingleFile => classify_file(target, ledger, raw, modified),
            TargetKind::DirectorySubtree => self.classify_subtree(target, ledger, raw, modified),
        }
    }

    fn classify_subtree(
        &self,
        target: &WatchTarget,
        ledger: &mut EntryLedger,
        raw: &RawEvent,
        modified: Option<DateTime<Utc>>,
    ) -> Classification {
        let Some(segments) = relative_segments(target.root_path(), &raw.path) else {
            return Classification::Filtered(FilterReason::OutsideTarget);
        };
        let session_id = segments[0].clone();

        if segments.len() == 1 {
            return match raw.kind {
                RawKind::Removed => {
                    ledger.sessions.remove(&session_id);
                    Classification::Filtered(FilterReason::Directory)
                }
                _ if !raw.is_dir => Classification::Filtered(FilterReason::NotMarkdown),
                _ => match announce_session(ledger, session_id) {
                    Some(event) => Classification::Events(vec![event]),
                    None => Classification::Filtered(FilterReason::KnownSession),
                },
            };
        }

        let Some(file_path) = display_relative(&raw.path, target.root_path()) else {
            return Classification::Filtered(FilterReason::OutsideTarget);
        };

        // A file inside a session directory we never saw created: the
        // directory's own event was coalesced away or raced the watch.
        let announced = if raw.kind != RawKind::Removed {
            announce_session(ledger, session_id)
        } else {
            None
        };
        let file = file_payload(file_path, raw.kind, modified).map(DomainEvent::new);

        let events: Vec<DomainEvent> = announced.into_iter().chain(file).collect();
        if events.is_empty() {
            return Classification::Filtered(FilterReason::StatFailed);
        }
        Classification::Events(events)
    }

    fn screen_file_name(&self, raw: &RawEvent) -> Result<(), FilterReason> {
        if raw.is_dir {
            return Err(FilterReason::Directory);
        }
        let Some(name) = raw.path.file_name().and_then(|name| name.to_str()) else {
            return Err(FilterReason::NotMarkdown);
        };
        if name.starts_with('.') {
            return Err(FilterReason::Hidden);
        }
        if self.rules.ignored_files.iter().any(|ignored| ignored == name) {
            return Err(FilterReason::Ignored);
        }
        if !has_markdown_extension(&raw.path) {
            return Err(FilterReason::NotMarkdown);
        }
        Ok(())
    }

    /// Snapshot what already exists when a watch starts: the session
    /// directories under a subtree root, so only directories created
    /// afterwards are announced, or whether a watched file is present.
    /// Blocking; call from a blocking context.
    pub fn seed(&self, target: &WatchTarget) -> EntryLedger {
        let mut ledger = EntryLedger::default();
        if target.kind() == TargetKind::SingleFile {
            ledger.file_present = target.root_path().is_file();
            return ledger;
        }

        let entries = match std::fs::read_dir(target.root_path()) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(
                    root = %target.root_path().display(),
                    error = %err,
                    "unable to seed session ledger"
                );
                return ledger;
            }
        };

        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|ty| ty.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && self.rules.session_pattern.is_match(name)
            {
                ledger.sessions.insert(name.to_string());
            }
        }
        ledger
    }
}

fn announce_session(ledger: &mut EntryLedger, session_id: String) -> Option<DomainEvent> {
    if !ledger.sessions.insert(session_id.clone()) {
        return None;
    }
    Some(DomainEvent::new(EventPayload::SessionCreated(SessionData {
        session_id,
    })))
}

fn classify_file(
    target: &WatchTarget,
    ledger: &mut EntryLedger,
    raw: &RawEvent,
    modified: Option<DateTime<Utc>>,
) -> Classification {
    let kind = match raw.kind {
        RawKind::Created if ledger.file_present => RawKind::Modified,
        kind => kind,
    };
    let Some(payload) = file_payload(target.label().to_string(), kind, modified) else {
        return Classification::Filtered(FilterReason::StatFailed);
    };
    ledger.file_present = raw.kind != RawKind::Removed;
    Classification::Events(vec![DomainEvent::new(payload)])
}

fn file_payload(
    file_path: String,
    kind: RawKind,
    modified: Option<DateTime<Utc>>,
) -> Option<EventPayload> {
    if kind == RawKind::Removed {
        return Some(EventPayload::FileDeleted(FileData {
            file_path,
            last_modified: None,
        }));
    }

    let data = FileData {
        file_path,
        last_modified: Some(modified?),
    };
    Some(match kind {
        RawKind::Created => EventPayload::FileCreated(data),
        _ => EventPayload::FileChanged(data),
    })
}

/// Modification time of `path`, or `None` when it cannot be read.
pub async fn last_modified(path: &Path) -> Option<DateTime<Utc>> {
    tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn relative_segments(root: &Path, path: &Path) -> Option<Vec<String>> {
    let rel = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(seg) => segments.push(seg.to_str()?.to_string()),
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments)
}
