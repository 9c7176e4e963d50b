pub mod sources;

use std::path::PathBuf;

use mdview_core::{FsWatchConfig, LifecycleSettings, WatchConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub content: ContentConfig,
    pub sessions: SessionsConfig,
    pub watch: WatchConfig,
    pub cors: CorsConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn fs_watch(&self) -> FsWatchConfig {
        self.watch.into()
    }

    /// Roots and limits handed to the lifecycle manager.
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            content_root: self.content.root.clone(),
            sessions_root: self.sessions.root.clone(),
            sessions_max_depth: self.sessions.max_depth,
            channel_capacity: self.fs_watch().channel_capacity,
        }
    }

    /// Canonicalise the configured roots so path containment checks compare
    /// like with like. A missing sessions root is left as configured.
    pub fn normalize_paths(&mut self) -> std::io::Result<()> {
        self.content.root = std::fs::canonicalize(&self.content.root)?;
        if let Some(root) = self.sessions.root.as_mut()
            && root.exists()
        {
            *root = std::fs::canonicalize(&*root)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// The project root Markdown documents are served from.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    pub root: PathBuf,
}

/// Secondary session corpus watched as a directory subtree.
#[derive(Debug, Clone)]
pub struct SessionsConfig {
    pub root: Option<PathBuf>,
    pub max_depth: usize,
    pub ignored_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
