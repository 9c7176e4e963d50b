use std::sync::Arc;

use mdview_config::Config;
use mdview_core::{EventClassifier, LifecycleManager, WatchBackend, WatchRegistry};
use tokio::task::JoinHandle;
use tracing::info;

use super::app_state::AppState;

/// Everything the router needs plus the registry actor's task handle, which
/// the binary awaits after shutdown so released watches are observed.
#[derive(Debug)]
pub struct WatchRuntime {
    pub state: AppState,
    pub registry_task: JoinHandle<()>,
}

/// Spawn the watch registry on the current runtime and wire the lifecycle
/// manager over it. `backend` is `NotifyBackend` in production.
pub fn build_runtime(config: Arc<Config>, backend: Arc<dyn WatchBackend>) -> WatchRuntime {
    let classifier = EventClassifier::new(config.sessions.ignored_files.iter().cloned());
    let (registry, registry_task) =
        WatchRegistry::spawn(&config.fs_watch(), backend, classifier);
    let lifecycle = LifecycleManager::new(registry, config.lifecycle_settings());

    info!(
        content_root = %config.content.root.display(),
        sessions_enabled = config.sessions.root.is_some(),
        quiet_period_ms = config.watch.quiet_period_ms,
        "watch registry started"
    );

    WatchRuntime {
        state: AppState::new(config, lifecycle),
        registry_task,
    }
}
