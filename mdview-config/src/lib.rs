//! Configuration for the mdview server.
//!
//! Values are layered: built-in defaults, then `mdview.toml`, then
//! `MDVIEW_*` environment variables (optionally seeded from a `.env` file),
//! then command-line overrides supplied by the binary.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigOverrides,
};
pub use models::{
    Config, ConfigMetadata, ContentConfig, CorsConfig, ServerConfig, SessionsConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
