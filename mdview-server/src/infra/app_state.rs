use std::{fmt, sync::Arc, time::Duration};

use mdview_config::Config;
use mdview_core::LifecycleManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: LifecycleManager,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(config: Arc<Config>, lifecycle: LifecycleManager) -> Self {
        Self { config, lifecycle }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Interval between SSE comment frames on otherwise idle streams.
    pub fn keep_alive(&self) -> Duration {
        self.config.fs_watch().keep_alive
    }
}
