//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerOptions (validated, immutable)
//!     → Server stores it; App resolves defaults at assembly time
//!
//! Environment:
//!     env.rs snapshot → trust_proxy.rs (TRUST_PROXY fallback)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Defaults that depend on the environment are computed at assembly,
//!   never written back into the options

pub mod env;
pub mod loader;
pub mod schema;
pub mod trust_proxy;
pub mod validation;

pub use env::EnvSnapshot;
pub use schema::{
    AppOptions, CompressionLevel, CompressionOptions, CookieOptions, CorsOptions, CsrfOptions,
    ListenerOptions, LoggerOptions, RateLimitOptions, ServerOptions, SinkKind, SocketOptions,
};
pub use trust_proxy::TrustProxy;
