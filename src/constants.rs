//! Names shared between the server and its clients.

/// Cookie carrying the anti-forgery token issued on every non-JSON request.
pub const XSRF_COOKIE_NAME: &str = "XSRF-TOKEN";

/// Request header a client echoes the anti-forgery token back in.
pub const XSRF_HEADER_NAME: &str = "X-XSRF-TOKEN";

/// Environment variable consulted when `trust_proxy` is not configured.
pub const TRUST_PROXY_ENV: &str = "TRUST_PROXY";

/// Render-local key the anti-forgery token is exposed under.
pub const XSRF_LOCAL_KEY: &str = "xsrfToken";
