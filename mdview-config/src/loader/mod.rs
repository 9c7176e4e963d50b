mod error;

use once_cell::sync::Lazy;
use std::{fs, path::PathBuf};

use mdview_core::{WatchConfig, classify::DEFAULT_IGNORED_FILES};

pub use error::ConfigLoadError;

use crate::{
    models::{
        Config, ConfigMetadata, ContentConfig, CorsConfig, ServerConfig,
        SessionsConfig,
        sources::{EnvConfig, FileConfig, FileWatchConfig},
    },
    validation::{self, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("mdview.toml"),
        PathBuf::from("config/mdview.toml"),
    ]
});

const DEFAULT_SESSIONS_MAX_DEPTH: usize = 3;

/// Values supplied on the command line. These win over every other source.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub content_root: Option<PathBuf>,
    pub sessions_root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.options.overrides = overrides;
        self
    }

    /// Load `.env`, read the process environment and compose the final
    /// configuration.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.compose(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`ConfigLoader::load`] but with a caller-supplied environment.
    /// Nothing is read from `.env` or the process environment.
    pub fn load_from_env(
        &self,
        env_config: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        self.compose(env_config, false)
    }

    fn compose(
        &self,
        env_config: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env_config)?;
        let (config, warnings) = self.compose_config(
            file_config,
            env_config,
            config_path,
            env_file_loaded,
        )?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if file_config.is_none() {
            warnings.push_with_hint(
                "No mdview.toml detected; using defaults and environment variables",
                "Create mdview.toml in the working directory or set MDVIEW_CONFIG",
            );
        }

        let FileConfig {
            server: file_server,
            content: file_content,
            sessions: file_sessions,
            watch: file_watch,
            cors: file_cors,
            dev_mode: file_dev_mode,
        } = file_config.unwrap_or_default();
        let overrides = self.options.overrides.clone();

        let server = ServerConfig {
            host: overrides
                .host
                .or(env.server_host)
                .or(file_server.host)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: overrides
                .port
                .or(env.server_port)
                .or(file_server.port)
                .unwrap_or(3000),
        };

        let content = ContentConfig {
            root: overrides
                .content_root
                .or(env.content_root)
                .or(file_content.root)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let sessions = SessionsConfig {
            root: overrides
                .sessions_root
                .or(env.sessions_root)
                .or(file_sessions.root),
            max_depth: file_sessions
                .max_depth
                .unwrap_or(DEFAULT_SESSIONS_MAX_DEPTH),
            ignored_files: file_sessions.ignored_files.unwrap_or_else(|| {
                DEFAULT_IGNORED_FILES
                    .iter()
                    .map(|name| name.to_string())
                    .collect()
            }),
        };

        let mut watch = merge_watch(file_watch);
        if let Some(quiet) = env.quiet_period_ms {
            watch.quiet_period_ms = quiet;
        }

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .or(file_cors.allowed_origins)
                .unwrap_or_default(),
        };

        let dev_mode = env.dev_mode.or(file_dev_mode).unwrap_or(false);

        let mut config = Config {
            server,
            content,
            sessions,
            watch,
            cors,
            dev_mode,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        // Guard rails first: canonicalisation fails on a missing root and the
        // guard-rail error names the problem more clearly.
        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        config
            .normalize_paths()
            .map_err(|err| ConfigLoadError::Filesystem { source: err })?;

        Ok((config, warnings))
    }
}

fn merge_watch(file: FileWatchConfig) -> WatchConfig {
    let defaults = WatchConfig::default();
    WatchConfig {
        quiet_period_ms: file.quiet_period_ms.unwrap_or(defaults.quiet_period_ms),
        stability_threshold_ms: file
            .stability_threshold_ms
            .unwrap_or(defaults.stability_threshold_ms),
        stability_poll_ms: file
            .stability_poll_ms
            .unwrap_or(defaults.stability_poll_ms),
        channel_capacity: file
            .channel_capacity
            .unwrap_or(defaults.channel_capacity),
        keep_alive_secs: file.keep_alive_secs.unwrap_or(defaults.keep_alive_secs),
    }
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        self.default
            .as_ref()
            .map(|path| (path.clone(), ConfigPathProvenance::Default))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
