//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server::close()
//!     → socket hub: Shutdown::trigger → every connection sends Close
//!     → HTTP server: Shutdown::trigger → stop accepting, drain in-flight
//!     → serve task joined, result returned to the caller
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: sockets first, then the listener
//! - No forced deadline; close resolves when the serve task finishes

pub mod shutdown;

pub use shutdown::Shutdown;
