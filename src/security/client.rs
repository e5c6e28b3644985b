//! Client address resolution behind reverse proxies.
//!
//! # Responsibilities
//! - Build the forwarding chain from the socket peer and `X-Forwarded-For`
//! - Walk the chain while hops are trusted; the first untrusted hop is the client
//! - Derive protocol and host from `X-Forwarded-Proto` / `X-Forwarded-Host`
//!   when the socket peer itself is trusted
//!
//! Without a truthy trust setting the socket peer is the client and
//! forwarding headers are ignored.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::config::trust_proxy::{normalize, InvalidTrustEntry, TrustProxy, TrustRule};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Who sent the request, as far as the trust setting allows us to tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client address.
    pub ip: Option<IpAddr>,
    /// Trusted proxy chain, client first, excluding the socket peer.
    pub ips: Vec<IpAddr>,
    /// `http` or the forwarded protocol.
    pub protocol: String,
    /// `Host`, or the forwarded host.
    pub host: Option<String>,
}

/// Resolves [`ClientInfo`] for a trust setting.
#[derive(Debug, Clone, Default)]
pub struct ClientResolver {
    rule: Option<Arc<TrustRule>>,
}

impl ClientResolver {
    /// `None` or a falsy setting disables proxy trust.
    pub fn new(trust: Option<&TrustProxy>) -> Result<Self, InvalidTrustEntry> {
        let rule = match trust {
            Some(t) if t.is_truthy() => Some(Arc::new(t.compile()?)),
            _ => None,
        };
        Ok(Self { rule })
    }

    pub fn trusts_proxies(&self) -> bool {
        self.rule.is_some()
    }

    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> ClientInfo {
        let host_header = header_str(headers, header::HOST.as_str()).map(str::to_string);

        let (Some(rule), Some(peer)) = (self.rule.as_deref(), peer) else {
            return ClientInfo {
                ip: peer.map(normalize),
                ips: Vec::new(),
                protocol: "http".to_string(),
                host: host_header,
            };
        };

        // Socket peer first, then forwarded entries from nearest to farthest.
        let mut chain = vec![normalize(peer)];
        if let Some(xff) = header_str(headers, X_FORWARDED_FOR) {
            for entry in xff.split(',').rev().map(str::trim) {
                match entry.parse::<IpAddr>() {
                    Ok(addr) => chain.push(normalize(addr)),
                    Err(_) => break,
                }
            }
        }

        let mut client = chain.len() - 1;
        for (hop, addr) in chain.iter().enumerate().take(chain.len() - 1) {
            if !rule.trusts(*addr, hop) {
                client = hop;
                break;
            }
        }

        let peer_trusted = rule.trusts(chain[0], 0);
        let protocol = if peer_trusted {
            header_str(headers, X_FORWARDED_PROTO)
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "http".to_string())
        } else {
            "http".to_string()
        };
        let host = if peer_trusted {
            header_str(headers, X_FORWARDED_HOST)
                .map(|v| v.trim().to_string())
                .or(host_header)
        } else {
            host_header
        };

        ClientInfo {
            ip: Some(chain[client]),
            ips: chain[1..=client].iter().rev().copied().collect(),
            protocol,
            host,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn peer_of(extensions: &axum::http::Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Outermost middleware: attaches [`ClientInfo`] to every request.
pub async fn client_info_middleware(
    State(resolver): State<ClientResolver>,
    mut request: Request,
    next: Next,
) -> Response {
    let info = resolver.resolve(peer_of(request.extensions()), request.headers());
    request.extensions_mut().insert(info);
    next.run(request).await
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(info) = parts.extensions.get::<ClientInfo>() {
            return Ok(info.clone());
        }
        Ok(ClientResolver::default().resolve(peer_of(&parts.extensions), &parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_trust_uses_peer() {
        let resolver = ClientResolver::new(None).unwrap();
        let info = resolver.resolve(
            Some(ip("10.0.0.1")),
            &headers(&[("x-forwarded-for", "1.2.3.4"), ("x-forwarded-proto", "https")]),
        );
        assert_eq!(info.ip, Some(ip("10.0.0.1")));
        assert_eq!(info.protocol, "http");
        assert!(info.ips.is_empty());

        let resolver = ClientResolver::new(Some(&TrustProxy::Bool(false))).unwrap();
        assert!(!resolver.trusts_proxies());
    }

    #[test]
    fn test_trust_all_takes_leftmost() {
        let resolver = ClientResolver::new(Some(&TrustProxy::Bool(true))).unwrap();
        let info = resolver.resolve(
            Some(ip("10.0.0.1")),
            &headers(&[
                ("x-forwarded-for", "1.2.3.4, 5.6.7.8"),
                ("x-forwarded-proto", "https, http"),
                ("x-forwarded-host", "example.com"),
            ]),
        );
        assert_eq!(info.ip, Some(ip("1.2.3.4")));
        assert_eq!(info.ips, vec![ip("1.2.3.4"), ip("5.6.7.8")]);
        assert_eq!(info.protocol, "https");
        assert_eq!(info.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_hop_count() {
        let resolver = ClientResolver::new(Some(&TrustProxy::Hops(1))).unwrap();
        let info = resolver.resolve(
            Some(ip("10.0.0.1")),
            &headers(&[("x-forwarded-for", "1.2.3.4, 5.6.7.8")]),
        );
        assert_eq!(info.ip, Some(ip("5.6.7.8")));
        assert_eq!(info.ips, vec![ip("5.6.7.8")]);
    }

    #[test]
    fn test_trust_list() {
        let resolver =
            ClientResolver::new(Some(&TrustProxy::List("loopback, 10.0.0.0/8".into()))).unwrap();
        let info = resolver.resolve(
            Some(ip("127.0.0.1")),
            &headers(&[("x-forwarded-for", "203.0.113.7, 198.51.100.1, 10.1.1.1")]),
        );
        assert_eq!(info.ip, Some(ip("198.51.100.1")));

        // Untrusted peer: forwarding headers are ignored entirely.
        let info = resolver.resolve(
            Some(ip("192.0.2.1")),
            &headers(&[("x-forwarded-for", "203.0.113.7"), ("x-forwarded-proto", "https")]),
        );
        assert_eq!(info.ip, Some(ip("192.0.2.1")));
        assert_eq!(info.protocol, "http");
    }

    #[test]
    fn test_invalid_list_is_an_error() {
        assert!(ClientResolver::new(Some(&TrustProxy::List("nonsense".into()))).is_err());
    }
}
