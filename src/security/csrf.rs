//! Double-submit CSRF protection.
//!
//! # Flow
//! ```text
//! JSON request      → pass through untouched
//! any other request → fresh token → render locals + Set-Cookie
//!                   → header token valid?  yes → next handler
//!                                          no  → 412, empty body
//! ```
//!
//! Tokens are `<salt>-<mac>`: a random salt and the base64url HMAC-SHA256 of
//! that salt keyed by the configured secret. Any token minted with the same
//! secret verifies, so a client may echo back the cookie it received on an
//! earlier response.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cookie::Cookie;
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use sha2::Sha256;
use std::sync::Arc;

use crate::config::CsrfOptions;
use crate::constants::{XSRF_COOKIE_NAME, XSRF_HEADER_NAME, XSRF_LOCAL_KEY};
use crate::http::locals::Locals;

type HmacSha256 = Hmac<Sha256>;

const SALT_LENGTH: usize = 8;

/// Rejected CSRF options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("csrf secret must not be empty")]
    EmptySecret,
    #[error("invalid csrf header name: {0}")]
    InvalidHeaderName(String),
    #[error("invalid csrf cookie name: {0}")]
    InvalidCookieName(String),
}

fn mac(secret: &str, salt: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(salt.as_bytes());
    mac
}

/// Mint a token bound to `secret`.
pub fn create_token(secret: &str) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect();
    let tag = URL_SAFE_NO_PAD.encode(mac(secret, &salt).finalize().into_bytes());
    format!("{}-{}", salt, tag)
}

/// Check that `token` was minted with `secret`.
pub fn verify_token(secret: &str, token: &str) -> bool {
    let Some((salt, tag)) = token.split_once('-') else {
        return false;
    };
    let Ok(tag) = URL_SAFE_NO_PAD.decode(tag) else {
        return false;
    };
    mac(secret, salt).verify_slice(&tag).is_ok()
}

fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

struct CsrfConfig {
    secret: String,
    cookie_name: String,
    header_name: HeaderName,
}

/// Middleware state for CSRF protection.
#[derive(Clone)]
pub struct CsrfState {
    config: Arc<CsrfConfig>,
}

impl CsrfState {
    pub fn new(options: &CsrfOptions) -> Result<Self, CsrfError> {
        if options.token.is_empty() {
            return Err(CsrfError::EmptySecret);
        }
        let header = options.header_name.as_deref().unwrap_or(XSRF_HEADER_NAME);
        let header_name = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| CsrfError::InvalidHeaderName(header.to_string()))?;
        let cookie_name = options
            .cookie_name
            .clone()
            .unwrap_or_else(|| XSRF_COOKIE_NAME.to_string());
        if !is_cookie_token(&cookie_name) {
            return Err(CsrfError::InvalidCookieName(cookie_name));
        }
        Ok(Self {
            config: Arc::new(CsrfConfig {
                secret: options.token.clone(),
                cookie_name,
                header_name,
            }),
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.config.header_name
    }

    /// Mint a token with this state's secret.
    pub fn create_token(&self) -> String {
        create_token(&self.config.secret)
    }

    pub fn verify(&self, token: &str) -> bool {
        verify_token(&self.config.secret, token)
    }
}

/// A JSON request body. Requests that declare neither a length nor a
/// transfer coding have no body, whatever their content type.
fn is_json(headers: &HeaderMap) -> bool {
    let has_body = headers.contains_key(header::TRANSFER_ENCODING)
        || headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().parse::<u64>().is_ok());
    has_body
        && headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Middleware function for double-submit CSRF checks.
pub async fn csrf_middleware(
    State(state): State<CsrfState>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_json(request.headers()) {
        return next.run(request).await;
    }

    let token = state.create_token();
    Locals::insert_into(request.extensions_mut(), XSRF_LOCAL_KEY, token.clone());
    let cookie = Cookie::build((state.cookie_name().to_string(), token))
        .path("/")
        .build();

    let presented = request
        .headers()
        .get(state.header_name())
        .and_then(|v| v.to_str().ok());
    let header_present = presented.is_some();
    let valid = presented.is_some_and(|t| state.verify(t));

    let mut response = if valid {
        next.run(request).await
    } else {
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            header_present,
            "CSRF token rejected"
        );
        StatusCode::PRECONDITION_FAILED.into_response()
    };

    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
