//! # mdview server
//!
//! Serves live change notifications for Markdown documents under a project
//! root. Clients open an SSE channel per document (or one for the session
//! corpus) and re-render whenever a `file:*` or `session:created` event
//! arrives.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use mdview_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, ConfigOverrides};
use mdview_core::NotifyBackend;
use mdview_server::{WatchRuntime, build_runtime, create_app, infra::shutdown::shutdown_signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "mdview-server")]
#[command(about = "Live-reload notifications for a Markdown viewer")]
struct Cli {
    /// Path to mdview.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory Markdown documents are served from
    #[arg(long)]
    root: Option<PathBuf>,

    /// Session corpus directory watched as a subtree
    #[arg(long)]
    sessions_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config,
        env_file: cli.env_file,
        overrides: ConfigOverrides {
            host: cli.host,
            port: cli.port,
            content_root: cli.root,
            sessions_root: cli.sessions_root,
        },
    });
    let ConfigLoad { config, warnings } =
        loader.load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let config = Arc::new(config);
    let WatchRuntime {
        state,
        registry_task,
    } = build_runtime(Arc::clone(&config), Arc::new(NotifyBackend));
    let lifecycle = state.lifecycle().clone();
    let router = create_app(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(
        "Starting mdview server on http://{} (root {})",
        address,
        config.content.root.display()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(lifecycle))
        .await
        .context("server error")?;

    if let Err(err) = registry_task.await {
        warn!("watch registry task ended abnormally: {err}");
    }
    info!("mdview server stopped");
    Ok(())
}
