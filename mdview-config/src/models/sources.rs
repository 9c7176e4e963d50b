use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub content: FileContentConfig,
    #[serde(default)]
    pub sessions: FileSessionsConfig,
    #[serde(default)]
    pub watch: FileWatchConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileContentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSessionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored_files: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_period_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability_threshold_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability_poll_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub content_root: Option<PathBuf>,
    pub sessions_root: Option<PathBuf>,
    pub quiet_period_ms: Option<u64>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; `gather` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env_config = Self::default();

        env_config.config_path = lookup("MDVIEW_CONFIG").map(PathBuf::from);
        env_config.server_host = lookup("MDVIEW_HOST");
        env_config.server_port =
            lookup("MDVIEW_PORT").and_then(|s| s.parse().ok());
        env_config.content_root = lookup("MDVIEW_ROOT").map(PathBuf::from);
        env_config.sessions_root =
            lookup("MDVIEW_SESSIONS_ROOT").map(PathBuf::from);
        env_config.quiet_period_ms =
            lookup("MDVIEW_QUIET_PERIOD_MS").and_then(|s| s.parse().ok());
        env_config.cors_allowed_origins =
            lookup("MDVIEW_CORS_ALLOWED_ORIGINS").map(|raw| parse_csv(&raw));
        env_config.dev_mode =
            lookup("MDVIEW_DEV_MODE").and_then(|raw| parse_bool(&raw));

        env_config
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
