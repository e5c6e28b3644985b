//! Fixed-window rate limiting middleware.
//!
//! Every client (keyed by resolved IP) gets `limit` requests per window.
//! The window starts with the client's first request and resets once it
//! has elapsed.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitOptions;
use crate::security::client::ClientInfo;

/// Tracked clients above which expired windows are swept, at most once per
/// window length.
const PURGE_THRESHOLD: usize = 10_000;

/// Hit counter for one client.
struct Window {
    hits: u64,
    reset_at: Instant,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

/// Shared state for the rate limiter.
pub struct RateLimiterState {
    windows: DashMap<String, Window>,
    window: Duration,
    limit: u64,
    status: StatusCode,
    message: String,
    standard_headers: bool,
    legacy_headers: bool,
    purge_threshold: usize,
    epoch: Instant,
    /// Milliseconds after `epoch` of the last sweep.
    last_purge_ms: AtomicU64,
}

/// Rejected rate limit options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,
    #[error("invalid rate limit status code: {0}")]
    InvalidStatus(u16),
}

impl RateLimiterState {
    pub fn new(options: &RateLimitOptions) -> Result<Self, RateLimitError> {
        if options.window_ms == 0 {
            return Err(RateLimitError::ZeroWindow);
        }
        let status = StatusCode::from_u16(options.status_code)
            .map_err(|_| RateLimitError::InvalidStatus(options.status_code))?;
        Ok(Self {
            windows: DashMap::new(),
            window: Duration::from_millis(options.window_ms),
            limit: options.limit,
            status,
            message: options.message.clone(),
            standard_headers: options.standard_headers,
            legacy_headers: options.legacy_headers,
            purge_threshold: PURGE_THRESHOLD,
            epoch: Instant::now(),
            last_purge_ms: AtomicU64::new(0),
        })
    }

    /// Count a request from `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            hits: 0,
            reset_at: now + self.window,
        });
        if now >= entry.reset_at {
            entry.hits = 0;
            entry.reset_at = now + self.window;
        }
        entry.hits += 1;

        Decision {
            allowed: entry.hits <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(entry.hits),
            reset_after: entry.reset_at.saturating_duration_since(now),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        self.maybe_purge(now);
        self.check_at(key, now)
    }

    /// Sweep expired windows when many clients are tracked and no sweep ran
    /// during the last window. Returns whether this call swept.
    fn maybe_purge(&self, now: Instant) -> bool {
        if self.windows.len() < self.purge_threshold {
            return false;
        }
        let elapsed = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let last = self.last_purge_ms.load(Ordering::Relaxed);
        if elapsed.saturating_sub(last) < self.window.as_millis() as u64 {
            return false;
        }
        // One caller wins the sweep for this window.
        if self
            .last_purge_ms
            .compare_exchange(last, elapsed, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        self.purge_expired_at(now);
        true
    }

    /// Forget a client's window.
    pub fn reset_key(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Drop windows that have already expired.
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&self, now: Instant) {
        self.windows.retain(|_, w| w.reset_at > now);
    }

    fn write_headers(&self, headers: &mut HeaderMap, decision: &Decision) {
        let reset_secs = decision.reset_after.as_secs_f64().ceil() as u64;
        let mut set = |name: &'static str, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };
        if self.standard_headers {
            set(
                "ratelimit-policy",
                format!("{};w={}", decision.limit, self.window.as_secs().max(1)),
            );
            set("ratelimit-limit", decision.limit.to_string());
            set("ratelimit-remaining", decision.remaining.to_string());
            set("ratelimit-reset", reset_secs.to_string());
        }
        if self.legacy_headers {
            let reset_epoch = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
                + reset_secs;
            set("x-ratelimit-limit", decision.limit.to_string());
            set("x-ratelimit-remaining", decision.remaining.to_string());
            set("x-ratelimit-reset", reset_epoch.to_string());
        }
    }
}

fn client_key(request: &Request) -> String {
    if let Some(ip) = request.extensions().get::<ClientInfo>().and_then(|c| c.ip) {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    let decision = state.check(&key);

    if decision.allowed {
        let mut response = next.run(request).await;
        state.write_headers(response.headers_mut(), &decision);
        response
    } else {
        tracing::warn!(client = %key, limit = decision.limit, "Rate limit exceeded");
        let mut response = Response::new(Body::from(state.message.clone()));
        *response.status_mut() = state.status;
        state.write_headers(response.headers_mut(), &decision);
        let retry_after = decision.reset_after.as_secs_f64().ceil() as u64;
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}
