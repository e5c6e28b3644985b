//! Pre-assembled axum application and server with standard middleware.

pub mod config;
pub mod constants;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod server;
pub mod terminal;

pub use config::ServerOptions;
pub use http::{App, AppError, HttpServer, ServerError, SocketServer};
pub use lifecycle::Shutdown;
pub use server::Server;
pub use terminal::Terminal;
