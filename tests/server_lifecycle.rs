//! Listen / close behaviour of the server façade against a real socket.

use axum::{routing::get, Router};
use serverkit::config::ServerOptions;
use serverkit::ServerError;

mod common;

#[tokio::test]
async fn test_close_without_listen_fails() {
    let server = common::quiet_server(ServerOptions::default());
    assert!(matches!(server.close().await, Err(ServerError::NotRunning)));
}

#[tokio::test]
async fn test_listen_serve_close() {
    let server = common::quiet_server(ServerOptions::default());
    server
        .route("/hello", get(|| async { "hello" }))
        .unwrap();
    let addr = common::listen(&server).await;
    assert_eq!(server.address(), Some(addr));

    let client = common::client();
    let response = client.get(common::url(addr, "/hello")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    server.close().await.unwrap();
    assert!(server.address().is_none());
    assert!(client.get(common::url(addr, "/hello")).send().await.is_err());
}

#[tokio::test]
async fn test_mount_after_listen_is_served() {
    let server = common::quiet_server(ServerOptions::default());
    let addr = common::listen(&server).await;
    let client = common::client();

    let before = client.get(common::url(addr, "/api/items")).send().await.unwrap();
    assert_eq!(before.status(), 404);

    server
        .mount("/api", Router::new().route("/items", get(|| async { "[]" })))
        .unwrap();
    let after = client.get(common::url(addr, "/api/items")).send().await.unwrap();
    assert_eq!(after.status(), 200);
    assert_eq!(after.text().await.unwrap(), "[]");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_access_log_line_per_request() {
    let (sink, lines) = common::capture_sink();
    let server = serverkit::Server::with_env(
        ServerOptions::default(),
        serverkit::config::EnvSnapshot::empty(),
    )
    .with_logger(sink);
    server.route("/hello", get(|| async { "hello" })).unwrap();
    let addr = common::listen(&server).await;

    let client = common::client();
    let body = client
        .get(common::url(addr, "/hello?x=1"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello");
    server.close().await.unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("127.0.0.1 HTTP/1.1 GET /hello?x=1"));
    assert!(lines[0].contains("5 bytes"));
}

#[tokio::test]
async fn test_static_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.txt"), "from disk").unwrap();

    let server = common::quiet_server(ServerOptions::default());
    server.serve_dir("/assets", dir.path()).unwrap();
    let addr = common::listen(&server).await;

    let response = common::client()
        .get(common::url(addr, "/assets/index.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "from disk");

    server.close().await.unwrap();
}
