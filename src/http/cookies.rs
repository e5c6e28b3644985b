//! Cookie parsing.
//!
//! # Cookie value prefixes
//! ```text
//! s:<value>.<sig>   signed; sig = base64(HMAC-SHA256(secret, value)), unpadded
//! j:<json>          JSON-encoded value, read back with Cookies::json
//! ```
//!
//! Signed cookies are only recognised when at least one secret is
//! configured. They are moved out of the plain map; those that fail
//! verification against every secret are dropped.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use cookie::Cookie;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use crate::config::CookieOptions;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_PREFIX: &str = "s:";
const JSON_PREFIX: &str = "j:";

fn signature(value: &str, secret: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(value.as_bytes());
    mac
}

/// Produce a signed cookie value (`s:<value>.<sig>`) for `Set-Cookie`.
pub fn sign_cookie(value: &str, secret: &str) -> String {
    let sig = STANDARD_NO_PAD.encode(signature(value, secret).finalize().into_bytes());
    format!("{}{}.{}", SIGNED_PREFIX, value, sig)
}

/// Recover the value of a signed cookie, trying each secret in turn.
pub fn unsign_cookie<S: AsRef<str>>(signed: &str, secrets: &[S]) -> Option<String> {
    let body = signed.strip_prefix(SIGNED_PREFIX)?;
    let (value, sig) = body.rsplit_once('.')?;
    let sig = STANDARD_NO_PAD.decode(sig).ok()?;
    secrets
        .iter()
        .any(|secret| signature(value, secret.as_ref()).verify_slice(&sig).is_ok())
        .then(|| value.to_string())
}

/// Cookies sent with one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies {
    plain: HashMap<String, String>,
    signed: HashMap<String, String>,
}

impl Cookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.plain.get(name).map(String::as_str)
    }

    /// A signed cookie that verified against a configured secret.
    pub fn signed(&self, name: &str) -> Option<&str> {
        self.signed.get(name).map(String::as_str)
    }

    /// Decode a `j:` cookie, signed or plain. Signed values win.
    pub fn json(&self, name: &str) -> Option<serde_json::Value> {
        self.signed
            .get(name)
            .or_else(|| self.plain.get(name))
            .and_then(|v| v.strip_prefix(JSON_PREFIX))
            .and_then(|v| serde_json::from_str(v).ok())
    }

    pub fn len(&self) -> usize {
        self.plain.len() + self.signed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses `Cookie` headers into [`Cookies`].
#[derive(Debug, Clone, Default)]
pub struct CookieParser {
    secrets: Vec<String>,
    decode: bool,
}

impl CookieParser {
    pub fn new(options: &CookieOptions) -> Self {
        Self {
            secrets: options.secret.clone(),
            decode: options.decode,
        }
    }

    pub fn parse(&self, headers: &HeaderMap) -> Cookies {
        let mut cookies = Cookies::default();

        for raw in headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
        {
            let parsed: Vec<Cookie<'_>> = if self.decode {
                Cookie::split_parse_encoded(raw).filter_map(Result::ok).collect()
            } else {
                Cookie::split_parse(raw).filter_map(Result::ok).collect()
            };

            for cookie in parsed {
                let (name, value) = (cookie.name(), cookie.value());
                if cookies.plain.contains_key(name) || cookies.signed.contains_key(name) {
                    continue;
                }
                if !self.secrets.is_empty() && value.starts_with(SIGNED_PREFIX) {
                    match unsign_cookie(value, &self.secrets) {
                        Some(value) => {
                            cookies.signed.insert(name.to_string(), value);
                        }
                        None => tracing::debug!(cookie = name, "Dropped cookie with bad signature"),
                    }
                    continue;
                }
                cookies.plain.insert(name.to_string(), value.to_string());
            }
        }
        cookies
    }
}

/// Innermost middleware: attaches [`Cookies`] to every request.
pub async fn cookie_parser_middleware(
    State(parser): State<Arc<CookieParser>>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookies = parser.parse(request.headers());
    request.extensions_mut().insert(cookies);
    next.run(request).await
}

impl<S> FromRequestParts<S> for Cookies
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(cookies) = parts.extensions.get::<Cookies>() {
            return Ok(cookies.clone());
        }
        Ok(CookieParser::new(&CookieOptions::default()).parse(&parts.headers))
    }
}
