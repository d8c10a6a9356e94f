//! Client identity extraction.
//!
//! The rate limit key and the audit trail both need to know who sent a
//! request. By default that is the socket peer address taken from axum's
//! `ConnectInfo<SocketAddr>` extension.
//!
//! # Proxy Headers
//!
//! `X-Forwarded-For` and `X-Real-IP` are client-controlled. They are honoured
//! only when the socket peer itself lies inside one of the `TRUSTED_PROXIES`
//! CIDR ranges. With no ranges configured, headers are ignored entirely and
//! every client is keyed by its own connection.
//!
//! ```text
//! peer in TRUSTED_PROXIES?
//!   ├─ yes → first X-Forwarded-For entry → X-Real-IP → peer
//!   └─ no  → peer
//! ```
//!
//! Header values must parse as an IP address; anything else falls back to the
//! peer address so a client cannot inject arbitrary key material.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Identity used when neither headers nor the socket peer are available
/// (e.g. a router driven directly in tests).
pub const UNKNOWN_IP: &str = "unknown";

/// A CIDR range such as `10.0.0.0/8` or `::1/128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation. A bare address is an implicit /32 or /128.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (address, prefix) = match cidr.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = address.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(prefix) => prefix.parse::<u8>().ok()?,
            None => max_prefix,
        };

        if prefix_len > max_prefix {
            return None;
        }

        Some(Self { network, prefix_len })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Reverse proxies whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        let config = Self { ranges };
        if config.is_enabled() {
            debug!(count = config.ranges.len(), "Trusted proxy ranges configured");
        } else {
            debug!("No trusted proxies, client identity is the peer address");
        }
        config
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` is a trusted proxy. Always false when no ranges are set.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.ranges.iter().any(|range| range.contains(&ip))
    }
}

/// Socket peer address recorded by `into_make_service_with_connect_info`.
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Identity of the client that sent `req`, suitable for a rate limit key.
pub fn client_identity<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> String {
    let Some(peer) = peer_addr(req).map(|addr| addr.ip().to_canonical()) else {
        return UNKNOWN_IP.to_string();
    };

    if trusted_proxies.is_trusted(&peer)
        && let Some(forwarded) = forwarded_ip(req)
    {
        debug!(peer = %peer, client = %forwarded, "Using forwarded client address from trusted proxy");
        return forwarded.to_string();
    }

    peer.to_string()
}

/// First parseable address from `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let headers = req.headers();

    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = value.split(',').next()
        && let Ok(ip) = first.trim().parse::<IpAddr>()
    {
        return Some(ip.to_canonical());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
}
