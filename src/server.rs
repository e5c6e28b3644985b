//! Server façade.
//!
//! # Responsibilities
//! - Hold the options until a component is first needed
//! - Build the app, HTTP server and socket server at most once each
//! - Pass common calls through to the component that owns them
//! - Close sockets, then the listener
//!
//! Accessors return the cached instance on every call after the first.

use axum::{routing::MethodRouter, Router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use crate::config::{EnvSnapshot, ServerOptions};
use crate::http::{App, AppError, HttpServer, Locals, ServerError, SocketServer};
use crate::observability::access_log::{sink_for, SharedSink};

/// Lazily assembled app, HTTP server and socket server.
pub struct Server {
    options: ServerOptions,
    env: EnvSnapshot,
    logger: Option<SharedSink>,
    app: OnceLock<App>,
    server: OnceLock<HttpServer>,
    socket: OnceLock<SocketServer>,
    /// Serializes the first `socket()` calls so the endpoint is attached once.
    socket_init: Mutex<()>,
}

impl Server {
    /// Defaults that depend on the environment are read from the current
    /// process environment.
    pub fn new(options: ServerOptions) -> Self {
        Self::with_env(options, EnvSnapshot::capture())
    }

    pub fn with_env(options: ServerOptions, env: EnvSnapshot) -> Self {
        Self {
            options,
            env,
            logger: None,
            app: OnceLock::new(),
            server: OnceLock::new(),
            socket: OnceLock::new(),
            socket_init: Mutex::new(()),
        }
    }

    /// Route access log lines to `sink` instead of the configured one.
    /// Only affects an app that has not been built yet.
    pub fn with_logger(mut self, sink: SharedSink) -> Self {
        self.logger = Some(sink);
        self
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// The access log sink.
    pub fn logger(&self) -> SharedSink {
        self.logger
            .clone()
            .unwrap_or_else(|| sink_for(self.options.logger.sink))
    }

    pub fn app(&self) -> Result<&App, AppError> {
        if let Some(app) = self.app.get() {
            return Ok(app);
        }
        let app = App::assemble(&self.options.app, self.logger(), &self.env)?;
        Ok(self.app.get_or_init(|| app))
    }

    /// The HTTP server, built from the listener options only.
    pub fn server(&self) -> Result<&HttpServer, AppError> {
        let app = self.app()?;
        Ok(self
            .server
            .get_or_init(|| HttpServer::new(self.options.listener.clone(), app.clone())))
    }

    /// The socket server; the first call attaches its endpoint to the app.
    ///
    /// An invalid or already routed `socket.path` is returned as an error
    /// and nothing is cached.
    pub fn socket(&self) -> Result<&SocketServer, AppError> {
        if let Some(socket) = self.socket.get() {
            return Ok(socket);
        }
        let app = self.app()?;
        let _init = self.socket_init.lock().expect("socket init mutex poisoned");
        if let Some(socket) = self.socket.get() {
            return Ok(socket);
        }
        let path = App::normalize_path(&self.options.socket.path)?;
        let socket = SocketServer::new(self.options.socket.clone());
        app.attach(path, socket.method_router())?;
        tracing::debug!(path, "Socket server attached");
        Ok(self.socket.get_or_init(|| socket))
    }

    pub fn mount(&self, path: &str, router: Router) -> Result<&Self, AppError> {
        self.app()?.mount(path, router)?;
        Ok(self)
    }

    pub fn route(&self, path: &str, method_router: MethodRouter) -> Result<&Self, AppError> {
        self.app()?.route(path, method_router)?;
        Ok(self)
    }

    pub fn serve_dir(&self, path: &str, dir: impl AsRef<Path>) -> Result<&Self, AppError> {
        self.app()?.serve_dir(path, dir)?;
        Ok(self)
    }

    pub fn render(&self, view: &str, locals: &Locals) -> Result<String, AppError> {
        self.app()?.render(view, locals)
    }

    /// Bound address, once listening.
    pub fn address(&self) -> Option<SocketAddr> {
        self.server.get().and_then(HttpServer::address)
    }

    pub async fn listen(&self, address: Option<&str>) -> Result<SocketAddr, ServerError> {
        self.server()?.listen(address).await
    }

    /// Disconnect sockets, then stop the HTTP server and wait for it.
    pub async fn close(&self) -> Result<(), ServerError> {
        if let Some(socket) = self.socket.get() {
            socket.disconnect_all();
        }
        match self.server.get() {
            Some(server) => server.close().await,
            None => Err(ServerError::NotRunning),
        }
    }
}
