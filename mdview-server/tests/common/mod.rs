use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use axum_test::TestServer;
use futures::{StreamExt, stream::BoxStream};
use mdview_config::{
    Config, ConfigMetadata, ContentConfig, CorsConfig, ServerConfig, SessionsConfig,
};
use mdview_core::{WatchBackend, WatchConfig, WatchTarget};
use mdview_server::{AppState, WatchRuntime, build_runtime, create_app};
use serde_json::Value;
use tempfile::TempDir;

// Code is used by test modules, but not in this scope
#[allow(unused)]
#[derive(Debug)]
pub struct TestApp {
    pub dir: TempDir,
    pub root: PathBuf,
    pub sessions: PathBuf,
    pub state: AppState,
}

#[allow(unused)]
impl TestApp {
    /// Target the lifecycle manager builds for `label` under the content root.
    pub fn file_target(&self, label: &str) -> WatchTarget {
        WatchTarget::single_file(self.root.join(label), label)
    }

    pub fn sessions_target(&self) -> WatchTarget {
        WatchTarget::subtree(self.sessions.clone(), 3)
    }
}

/// Content root with `docs/readme.md`, `notes.txt` and an empty sessions
/// directory. The registry runs on `backend`.
pub fn spawn_app(backend: Arc<dyn WatchBackend>) -> TestApp {
    spawn_app_with(backend, true)
}

pub fn spawn_app_with(backend: Arc<dyn WatchBackend>, sessions_enabled: bool) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical tempdir");
    std::fs::create_dir(root.join("docs")).expect("docs dir");
    std::fs::write(root.join("docs/readme.md"), "# readme").expect("readme");
    std::fs::write(root.join("notes.txt"), "plain text").expect("notes");
    let sessions = root.join("sessions");
    std::fs::create_dir(&sessions).expect("sessions dir");

    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        content: ContentConfig { root: root.clone() },
        sessions: SessionsConfig {
            root: sessions_enabled.then(|| sessions.clone()),
            max_depth: 3,
            ignored_files: vec!["events.jsonl".into()],
        },
        watch: WatchConfig {
            quiet_period_ms: 30,
            stability_threshold_ms: 0,
            stability_poll_ms: 10,
            channel_capacity: 16,
            keep_alive_secs: 15,
        },
        cors: CorsConfig {
            allowed_origins: Vec::new(),
        },
        dev_mode: false,
        metadata: ConfigMetadata::default(),
    };

    let WatchRuntime { state, .. } = build_runtime(Arc::new(config), backend);
    TestApp {
        dir,
        root,
        sessions,
        state,
    }
}

#[allow(unused)]
pub fn test_server(app: &TestApp) -> TestServer {
    TestServer::builder()
        .http_transport()
        .build(create_app(app.state.clone()))
        .expect("test server")
}

/// Serve the app on a real socket; SSE bodies never finish on their own so
/// they are read incrementally with reqwest instead of through `TestServer`.
#[allow(unused)]
pub async fn serve_tcp(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = create_app(app.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

/// Reads `data:` frames off a streaming SSE response.
#[allow(unused)]
pub struct SseReader {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

#[allow(unused)]
impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: String::new(),
        }
    }

    /// Next JSON payload, skipping keep-alive comments. `None` once the
    /// server ends the stream.
    pub async fn next_event(&mut self) -> Option<Value> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let data: Vec<&str> = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    continue;
                }
                return Some(serde_json::from_str(&data.join("\n")).expect("json event"));
            }

            let chunk = self.chunks.next().await?.expect("sse chunk");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    pub async fn next_event_within(&mut self, limit: Duration) -> Option<Value> {
        tokio::time::timeout(limit, self.next_event())
            .await
            .expect("timed out waiting for SSE event")
    }
}
