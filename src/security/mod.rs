//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client.rs (resolve client address per trust setting)
//!     → rate_limit.rs (per-client request budget)
//!     → cors.rs (tower-http CorsLayer, when configured)
//!     → csrf.rs (double-submit token check, when configured)
//!     → Pass to compression, cookies and routes
//! ```
//!
//! # Design Decisions
//! - Fail closed: a missing or forged CSRF token never reaches a handler
//! - Forwarding headers are only believed from trusted peers

pub mod client;
pub mod cors;
pub mod csrf;
pub mod rate_limit;

pub use client::{ClientInfo, ClientResolver};
pub use csrf::{create_token, verify_token, CsrfState};
pub use rate_limit::RateLimiterState;
