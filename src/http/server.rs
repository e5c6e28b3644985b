//! HTTP server setup.
//!
//! # Responsibilities
//! - Bind a TCP listener
//! - Serve the app with peer addresses attached (`ConnectInfo`)
//! - Dispatch every request through the app's currently published router
//! - Stop accepting and drain in-flight requests on close

use axum::{extract::Request, Router};
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ListenerOptions;
use crate::http::app::{App, AppError};
use crate::lifecycle::Shutdown;

/// Errors from starting or stopping an [`HttpServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is not running")]
    NotRunning,

    #[error("server is already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    App(#[from] AppError),
}

struct Running {
    address: SocketAddr,
    shutdown: Shutdown,
    task: JoinHandle<std::io::Result<()>>,
}

/// HTTP server for an [`App`].
pub struct HttpServer {
    options: ListenerOptions,
    app: App,
    running: Mutex<Option<Running>>,
}

impl HttpServer {
    pub fn new(options: ListenerOptions, app: App) -> Self {
        Self {
            options,
            app,
            running: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Bound address, while listening.
    pub fn address(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .expect("server state mutex poisoned")
            .as_ref()
            .map(|r| r.address)
    }

    /// Bind `address` (or the configured host and port) and start serving
    /// in the background. Returns the bound address.
    pub async fn listen(&self, address: Option<&str>) -> Result<SocketAddr, ServerError> {
        if let Some(current) = self.address() {
            return Err(ServerError::AlreadyListening(current));
        }

        let address = address
            .map(str::to_string)
            .unwrap_or_else(|| self.options.bind_address());
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        let bound = listener.local_addr()?;

        let app = self.app.clone();
        let service = Router::new()
            .fallback(move |request: Request| {
                let app = app.clone();
                async move { app.handle(request).await }
            })
            .into_make_service_with_connect_info::<SocketAddr>();

        let shutdown = Shutdown::new();
        let serve = axum::serve(listener, service).with_graceful_shutdown(shutdown.signaled());

        let mut running = self.running.lock().expect("server state mutex poisoned");
        if let Some(current) = running.as_ref() {
            return Err(ServerError::AlreadyListening(current.address));
        }
        let task = tokio::spawn(async move {
            let result = serve.await;
            tracing::info!(address = %bound, "HTTP server stopped");
            result
        });
        *running = Some(Running {
            address: bound,
            shutdown,
            task,
        });

        tracing::info!(address = %bound, "HTTP server listening");
        Ok(bound)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn close(&self) -> Result<(), ServerError> {
        let running = self
            .running
            .lock()
            .expect("server state mutex poisoned")
            .take()
            .ok_or(ServerError::NotRunning)?;

        tracing::info!(address = %running.address, "HTTP server closing");
        running.shutdown.trigger();
        running.task.await??;
        Ok(())
    }
}
