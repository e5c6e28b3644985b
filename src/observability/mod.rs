//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every HTTP transaction:
//!     → access_log.rs (one colorized line → LogSink)
//!
//! Server internals (listen, close, socket events, rejections):
//!     → tracing events → logging.rs subscriber
//! ```
//!
//! # Design Decisions
//! - Access lines and diagnostics are separate streams
//! - The access sink is injectable; stdout by default

pub mod access_log;
pub mod logging;

pub use access_log::{
    access_log_middleware, format_line, sink_for, AccessLog, AccessRecord, LogSink, SharedSink,
    StderrSink, StdoutSink, TracingSink,
};
