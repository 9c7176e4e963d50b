mod common;

use std::{sync::Arc, time::Duration};

use common::{spawn_app, test_server};
use mdview_core::{RawEvent, RawKind, backend::manual::ManualBackend};
use serde_json::{Value, json};

#[tokio::test]
async fn websocket_watch_pushes_events_and_replaces_subscriptions() {
    let backend = ManualBackend::new();
    let app = spawn_app(Arc::new(backend.clone()));
    std::fs::write(app.root.join("docs/second.md"), "# second").unwrap();
    let server = test_server(&app);

    let mut socket = server.get_websocket("/ws").await.into_websocket().await;

    socket
        .send_json(&json!({ "type": "watch", "path": "docs/readme.md" }))
        .await;
    let connected: Value = socket.receive_json().await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["data"]["filePath"], "docs/readme.md");

    let target = app.file_target("docs/readme.md");
    backend.emit(&target, RawEvent::new(target.root_path(), RawKind::Modified));
    let changed: Value = socket.receive_json().await;
    assert_eq!(changed["type"], "file:changed");

    // A second watch on the same socket replaces the first subscription.
    socket
        .send_json(&json!({ "type": "watch", "path": "docs/second.md" }))
        .await;
    let connected: Value = socket.receive_json().await;
    assert_eq!(connected["data"]["filePath"], "docs/second.md");
    assert_eq!(backend.starts(), 2);
    assert_eq!(backend.releases(), 1);
    assert_eq!(app.state.lifecycle().open_subscriptions(), 1);

    socket.send_json(&json!({ "type": "unwatch" })).await;
    for _ in 0..50 {
        if backend.releases() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(backend.releases(), 2);
    assert_eq!(app.state.lifecycle().open_subscriptions(), 0);
}

#[tokio::test]
async fn websocket_reports_rejected_paths_as_error_events() {
    let backend = ManualBackend::new();
    let app = spawn_app(Arc::new(backend.clone()));
    let server = test_server(&app);

    let mut socket = server.get_websocket("/ws").await.into_websocket().await;
    socket
        .send_json(&json!({ "type": "watch", "path": "../secrets.md" }))
        .await;

    let error: Value = socket.receive_json().await;
    assert_eq!(error["type"], "error");
    assert!(
        error["data"]["message"]
            .as_str()
            .unwrap()
            .contains("outside the content root")
    );
    assert_eq!(backend.starts(), 0);
}

#[tokio::test]
async fn closing_the_socket_releases_the_watch() {
    let backend = ManualBackend::new();
    let app = spawn_app(Arc::new(backend.clone()));
    let server = test_server(&app);

    let mut socket = server.get_websocket("/ws").await.into_websocket().await;
    socket
        .send_json(&json!({ "type": "watch", "path": "docs/readme.md" }))
        .await;
    let _connected: Value = socket.receive_json().await;
    assert_eq!(backend.starts(), 1);

    socket.close().await;
    for _ in 0..50 {
        if backend.releases() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(backend.releases(), 1);
    assert_eq!(app.state.lifecycle().open_subscriptions(), 0);
}
