//! HTTP application and server subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum::serve, ConnectInfo)
//!     → app.rs (published router)
//!         → attached routes (websocket.rs upgrade endpoint)
//!         → middleware stack → mounted routes
//!             cookies.rs fills Cookies, locals.rs carries render values
//!             view.rs renders templates on request
//! ```

pub mod app;
pub mod cookies;
pub mod locals;
pub mod server;
pub mod view;
pub mod websocket;

pub use app::{App, AppError, Middleware};
pub use cookies::{sign_cookie, unsign_cookie, CookieParser, Cookies};
pub use locals::Locals;
pub use server::{HttpServer, ServerError};
pub use view::{RenderError, ViewEngine};
pub use websocket::{Socket, SocketServer};
