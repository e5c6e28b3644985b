//! Diagnostic logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Configure log level from `RUST_LOG`, with a per-crate default
//!
//! Access log lines are not routed through here; they go to the configured
//! [`LogSink`](super::access_log::LogSink).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "serverkit=info,tower_http=warn";

/// Install the global subscriber.
///
/// Returns an error if a global subscriber was already installed.
pub fn init(default_directives: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directives)),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
