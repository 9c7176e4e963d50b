//! Core of the mdview live-reload service.
//!
//! Clients subscribe to a Markdown file (or the session corpus subtree) and
//! receive typed change notifications. The pieces, leaf to root:
//!
//! - [`path`] validates client-supplied paths against the content root.
//! - [`backend`] adapts OS filesystem notifications into [`events::RawEvent`]s.
//! - [`debounce`] coalesces bursts of raw events per path.
//! - [`classify`] turns coalesced raw events into [`events::DomainEvent`]s.
//! - [`registry`] owns one OS watch per target and fans events out.
//! - [`lifecycle`] opens and closes subscriptions on top of the registry.

pub mod backend;
pub mod classify;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod path;
pub mod registry;
pub mod target;

pub use backend::{NotifyBackend, RawEventSink, WatchBackend, WatchHandle};
pub use classify::{Classification, EventClassifier, FilterReason};
pub use config::{FsWatchConfig, WatchConfig};
pub use error::{Result, WatchError};
pub use events::{DomainEvent, EventPayload, RawEvent, RawKind, SubscriberId};
pub use lifecycle::{
    CloseReason, LifecycleManager, LifecycleSettings, Subscription, SubscriptionState,
};
pub use path::PathRejection;
pub use registry::{RegistryStats, WatchRegistry};
pub use target::{TargetKey, TargetKind, WatchTarget};
