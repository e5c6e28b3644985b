//! Trust-proxy setting and its resolution.
//!
//! # Responsibilities
//! - Represent the three shapes the setting can take (flag, hop count, list)
//! - Resolve the default from the `TRUST_PROXY` environment variable
//! - Decide whether a given hop in the forwarding chain is trusted
//!
//! # Parsing policy
//! - Value is trimmed; empty means unset
//! - `true` / `false` in any case become a flag
//! - A decimal integer in `0..=2^53-1` becomes a hop count
//! - Anything else is kept verbatim as an address list

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::env::EnvSnapshot;
use crate::constants::TRUST_PROXY_ENV;

/// Largest integer a hop count may take (`Number.MAX_SAFE_INTEGER`).
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// How far forwarding headers are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TrustProxy {
    /// Trust every hop (`true`) or none (`false`).
    Bool(bool),
    /// Trust the given number of hops from the socket peer.
    Hops(u64),
    /// Comma-separated addresses, CIDR ranges or preset names.
    List(String),
}

impl TrustProxy {
    /// Parse a raw environment value.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        if value.eq_ignore_ascii_case("true") {
            return Some(Self::Bool(true));
        }
        if value.eq_ignore_ascii_case("false") {
            return Some(Self::Bool(false));
        }
        if value.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = value.parse::<u64>() {
                if n <= MAX_SAFE_INTEGER {
                    return Some(Self::Hops(n));
                }
            }
        }
        Some(Self::List(value.to_string()))
    }

    /// Explicit configuration wins; otherwise fall back to `TRUST_PROXY`.
    pub fn resolve(configured: Option<&TrustProxy>, env: &EnvSnapshot) -> Option<Self> {
        match configured {
            Some(value) => Some(value.clone()),
            None => env.get(TRUST_PROXY_ENV).and_then(Self::parse),
        }
    }

    /// Whether the setting enables proxy trust at all.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Hops(n) => *n > 0,
            Self::List(s) => !s.is_empty(),
        }
    }

    /// Compile into a predicate over `(address, hop index)`.
    pub fn compile(&self) -> Result<TrustRule, InvalidTrustEntry> {
        Ok(match self {
            Self::Bool(b) => TrustRule::All(*b),
            Self::Hops(n) => TrustRule::Hops(*n),
            Self::List(list) => TrustRule::Ranges(parse_list(list)?),
        })
    }
}

impl fmt::Display for TrustProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Hops(n) => write!(f, "{}", n),
            Self::List(s) => f.write_str(s),
        }
    }
}

/// An entry in a trust list that is neither an address, a range nor a preset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid trust proxy entry: {0}")]
pub struct InvalidTrustEntry(pub String);

/// Compiled form of [`TrustProxy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustRule {
    All(bool),
    Hops(u64),
    Ranges(Vec<IpRange>),
}

impl TrustRule {
    /// Whether `addr`, found `hop` steps away from the server, is trusted.
    pub fn trusts(&self, addr: IpAddr, hop: usize) -> bool {
        match self {
            Self::All(b) => *b,
            Self::Hops(n) => (hop as u64) < *n,
            Self::Ranges(ranges) => {
                let addr = normalize(addr);
                ranges.iter().any(|r| r.contains(addr))
            }
        }
    }
}

/// An address range in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn new(network: IpAddr, prefix: u8) -> Option<Self> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix <= max).then_some(Self { network, prefix })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn v4(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> IpRange {
    IpRange { network: IpAddr::V4(Ipv4Addr::new(a, b, c, d)), prefix }
}

fn v6(segments: [u16; 8], prefix: u8) -> IpRange {
    let [a, b, c, d, e, f, g, h] = segments;
    IpRange { network: IpAddr::V6(Ipv6Addr::new(a, b, c, d, e, f, g, h)), prefix }
}

fn preset(name: &str) -> Option<Vec<IpRange>> {
    match name {
        "loopback" => Some(vec![v4(127, 0, 0, 1, 8), v6([0, 0, 0, 0, 0, 0, 0, 1], 128)]),
        "linklocal" => Some(vec![v4(169, 254, 0, 0, 16), v6([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10)]),
        "uniquelocal" => Some(vec![
            v4(10, 0, 0, 0, 8),
            v4(172, 16, 0, 0, 12),
            v4(192, 168, 0, 0, 16),
            v6([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7),
        ]),
        _ => None,
    }
}

fn parse_list(list: &str) -> Result<Vec<IpRange>, InvalidTrustEntry> {
    let mut ranges = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if let Some(preset) = preset(entry) {
            ranges.extend(preset);
            continue;
        }
        let invalid = || InvalidTrustEntry(entry.to_string());
        let range = match entry.split_once('/') {
            Some((addr, prefix)) => {
                let addr = normalize(addr.parse::<IpAddr>().map_err(|_| invalid())?);
                let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
                IpRange::new(addr, prefix).ok_or_else(invalid)?
            }
            None => {
                let addr = normalize(entry.parse::<IpAddr>().map_err(|_| invalid())?);
                let full = if addr.is_ipv4() { 32 } else { 128 };
                IpRange { network: addr, prefix: full }
            }
        };
        ranges.push(range);
    }
    Ok(ranges)
}

/// Collapse IPv4-mapped IPv6 addresses to plain IPv4.
pub fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    }
}
