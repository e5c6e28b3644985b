//! Shared utilities for integration tests.

use serverkit::config::{EnvSnapshot, ServerOptions};
use serverkit::observability::SharedSink;
use serverkit::Server;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// A log sink that keeps every line it is given.
#[allow(dead_code)]
pub fn capture_sink() -> (SharedSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let sink: SharedSink = Arc::new(move |line: &str| {
        captured.lock().unwrap().push(line.to_string());
    });
    (sink, lines)
}

/// A server with an empty environment and a silent access log.
#[allow(dead_code)]
pub fn quiet_server(options: ServerOptions) -> Server {
    Server::with_env(options, EnvSnapshot::empty()).with_logger(Arc::new(|_: &str| {}))
}

/// Listen on an ephemeral loopback port.
#[allow(dead_code)]
pub async fn listen(server: &Server) -> SocketAddr {
    server.listen(Some("127.0.0.1:0")).await.unwrap()
}

/// A client that opens a fresh connection per request and ignores proxy
/// environment variables.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

#[allow(dead_code)]
pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}
