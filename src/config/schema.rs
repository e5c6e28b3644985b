//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::trust_proxy::TrustProxy;

/// Root configuration for a [`Server`](crate::Server).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerOptions {
    /// Where the HTTP server binds.
    pub listener: ListenerOptions,

    /// Application middleware settings.
    pub app: AppOptions,

    /// Real-time socket settings.
    pub socket: SocketOptions,

    /// Access log destination.
    pub logger: LoggerOptions,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerOptions {
    /// Host or IP to bind.
    pub host: String,

    /// TCP port; `0` picks an ephemeral port.
    pub port: u16,
}

impl ListenerOptions {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Application assembly options.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppOptions {
    /// Proxy trust; falls back to `TRUST_PROXY` when unset.
    pub trust_proxy: Option<TrustProxy>,

    /// Response compression.
    pub compression: CompressionOptions,

    /// Cookie parsing.
    pub cookie: CookieOptions,

    /// Cross-origin policy; no CORS layer when unset.
    pub cors: Option<CorsOptions>,

    /// Anti-forgery tokens; no CSRF layer when unset.
    pub csrf: Option<CsrfOptions>,

    /// Per-client request budget.
    pub rate_limit: RateLimitOptions,
}

/// Compression level.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Fastest,
    #[default]
    Default,
    Best,
}

/// Response compression options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompressionOptions {
    pub gzip: bool,
    pub br: bool,
    pub deflate: bool,
    pub zstd: bool,

    /// Responses smaller than this many bytes are sent as-is.
    pub threshold: u16,

    pub level: CompressionLevel,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            gzip: true,
            br: true,
            deflate: true,
            zstd: true,
            threshold: 1024,
            level: CompressionLevel::Default,
        }
    }
}

/// Cookie parser options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CookieOptions {
    /// Secrets for signed cookies, tried in order.
    #[serde(deserialize_with = "one_or_many")]
    pub secret: Vec<String>,

    /// Percent-decode cookie values.
    pub decode: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            secret: Vec::new(),
            decode: true,
        }
    }
}

/// Cross-origin resource sharing policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsOptions {
    /// Allowed origins; `"*"` allows any.
    pub origins: Vec<String>,

    /// Allowed methods.
    pub methods: Vec<String>,

    /// Allowed request headers; empty mirrors the preflight request.
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to scripts.
    pub exposed_headers: Vec<String>,

    /// Send `Access-Control-Allow-Credentials: true`.
    pub credentials: bool,

    /// Preflight cache lifetime.
    pub max_age_secs: Option<u64>,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            credentials: false,
            max_age_secs: None,
        }
    }
}

/// Double-submit CSRF options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CsrfOptions {
    /// Secret tokens are bound to.
    pub token: String,

    /// Cookie name override.
    #[serde(default)]
    pub cookie_name: Option<String>,

    /// Header name override.
    #[serde(default)]
    pub header_name: Option<String>,
}

impl CsrfOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            cookie_name: None,
            header_name: None,
        }
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }
}

/// Fixed-window rate limiting options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitOptions {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per client per window.
    pub limit: u64,

    /// Status sent once the budget is spent.
    pub status_code: u16,

    /// Body sent once the budget is spent.
    pub message: String,

    /// Emit `RateLimit-*` headers.
    pub standard_headers: bool,

    /// Emit `X-RateLimit-*` headers.
    pub legacy_headers: bool,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            limit: 5,
            status_code: 429,
            message: "Too many requests, please try again later.".to_string(),
            standard_headers: true,
            legacy_headers: true,
        }
    }
}

/// WebSocket layer options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SocketOptions {
    /// Route the upgrade endpoint is mounted at.
    pub path: String,

    /// Interval between keep-alive pings; `0` disables them.
    pub ping_interval_secs: u64,

    /// Largest accepted inbound message.
    pub max_message_size: usize,

    /// Buffer of the server-wide broadcast channel.
    pub channel_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            ping_interval_secs: 25,
            max_message_size: 1024 * 1024,
            channel_capacity: 256,
        }
    }
}

/// Built-in access log destinations.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Stdout,
    Stderr,
    Tracing,
}

/// Access log options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LoggerOptions {
    pub sink: SinkKind,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
