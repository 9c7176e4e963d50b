use std::path::PathBuf;

use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("content root {} does not exist", path.display())]
    ContentRootMissing { path: PathBuf },
    #[error("content root {} is not a directory", path.display())]
    ContentRootNotDirectory { path: PathBuf },
    #[error("sessions root {} is not a directory", path.display())]
    SessionsRootNotDirectory { path: PathBuf },
    #[error("CORS wildcard origins are not allowed when MDVIEW_DEV_MODE is false")]
    DangerousCorsWildcard,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    let root = &config.content.root;
    if !root.exists() {
        return Err(ConfigGuardRailError::ContentRootMissing { path: root.clone() });
    }
    if !root.is_dir() {
        return Err(ConfigGuardRailError::ContentRootNotDirectory {
            path: root.clone(),
        });
    }

    match &config.sessions.root {
        None => warnings.push_with_hint(
            "Sessions root not configured; session watching is disabled",
            "Set MDVIEW_SESSIONS_ROOT or sessions.root to enable /api/sessions/watch",
        ),
        Some(path) if !path.exists() => warnings.push_with_hint(
            format!("Sessions root {} does not exist yet", path.display()),
            "Session watch requests will return 404 until the directory is created",
        ),
        Some(path) if !path.is_dir() => {
            return Err(ConfigGuardRailError::SessionsRootNotDirectory {
                path: path.clone(),
            });
        }
        Some(_) => {}
    }

    if config.sessions.max_depth == 0 {
        warnings.push("sessions.max_depth of 0 is raised to 1");
    }

    let watch = &config.watch;
    if watch.quiet_period_ms == 0 {
        warnings.push_with_hint(
            "watch.quiet_period_ms is 0; clamping to 1ms",
            "A quiet period of a few hundred milliseconds absorbs editor save bursts",
        );
    }
    if watch.stability_threshold_ms > 0
        && watch.stability_poll_ms > watch.stability_threshold_ms
    {
        warnings.push(format!(
            "watch.stability_poll_ms ({}) exceeds watch.stability_threshold_ms ({}); polling at the threshold instead",
            watch.stability_poll_ms, watch.stability_threshold_ms
        ));
    }
    if watch.channel_capacity == 0 {
        warnings.push("watch.channel_capacity of 0 is raised to 1");
    }

    if config.cors.is_wildcard_included() {
        if !config.dev_mode {
            return Err(ConfigGuardRailError::DangerousCorsWildcard);
        }
        warnings.push("CORS allows any origin (dev mode)");
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConfigMetadata, ContentConfig, CorsConfig, ServerConfig, SessionsConfig,
    };
    use mdview_core::WatchConfig;

    fn config(root: PathBuf) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 3000,
            },
            content: ContentConfig { root },
            sessions: SessionsConfig {
                root: None,
                max_depth: 3,
                ignored_files: Vec::new(),
            },
            watch: WatchConfig::default(),
            cors: CorsConfig {
                allowed_origins: Vec::new(),
            },
            dev_mode: false,
            metadata: ConfigMetadata::default(),
        }
    }

    #[test]
    fn missing_content_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply_guard_rails(&config(dir.path().join("nope"))).unwrap_err();
        assert!(matches!(err, ConfigGuardRailError::ContentRootMissing { .. }));
    }

    #[test]
    fn file_as_content_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("readme.md");
        std::fs::write(&file, "# hi").unwrap();
        let err = apply_guard_rails(&config(file)).unwrap_err();
        assert!(matches!(err, ConfigGuardRailError::ContentRootNotDirectory { .. }));
    }

    #[test]
    fn suspicious_watch_tuning_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.watch.quiet_period_ms = 0;
        cfg.watch.stability_poll_ms = 500;

        let warnings = apply_guard_rails(&cfg).unwrap();
        // unset sessions root, zero quiet period, poll above threshold
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.message.contains("quiet_period_ms")));
    }

    #[test]
    fn wildcard_cors_requires_dev_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.cors.allowed_origins = vec!["*".into()];
        assert!(matches!(
            apply_guard_rails(&cfg).unwrap_err(),
            ConfigGuardRailError::DangerousCorsWildcard
        ));

        cfg.dev_mode = true;
        assert!(apply_guard_rails(&cfg).is_ok());
    }
}
