//! Client identity resolution.
//!
//! Every piece of admission state is keyed by a [`ClientIdentity`] derived
//! from request metadata, in this order:
//!
//! 1. `X-Forwarded-For`: the first comma-separated entry, trimmed
//! 2. `X-Real-IP`: trimmed
//! 3. The transport peer address (`ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`] when nothing else is available
//!
//! Header values are not checked for IP syntax; any non-empty string is used
//! as-is. Blank values fall through to the next source.
//!
//! # Deployment Precondition: Proxy Header Trust
//!
//! **Proxy headers are client-controlled unless a proxy overwrites them.**
//! Exposed directly to the internet, a client can rotate `X-Forwarded-For`
//! values to dodge its own rate limit or to get somebody else blocked. Run
//! this service only behind a reverse proxy that overwrites these headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Optionally set `TRUSTED_PROXIES` to the proxy's CIDR ranges. When the
//! peer address is known and falls outside every range, the proxy headers
//! are ignored and the peer address becomes the identity. With no ranges
//! configured, headers are trusted verbatim.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use tracing::{debug, warn};

/// Identity used when neither headers nor the peer address are available.
pub const UNKNOWN_IP: &str = "unknown";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

// =============================================================================
// Trusted Proxy Ranges
// =============================================================================

/// A parsed CIDR block (`10.0.0.0/8`, `::1/128`, or a bare address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation. A bare address is a host route (/32 or /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

/// Proxies whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
///
/// Empty means every peer is trusted.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<CidrRange>,
}

impl TrustedProxies {
    /// Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether headers sent by `peer` may name the client.
    pub fn trusts(&self, peer: Option<IpAddr>) -> bool {
        match peer {
            _ if self.ranges.is_empty() => true,
            // No peer address to check against; nothing better to fall back on
            None => true,
            Some(ip) => self.ranges.iter().any(|range| range.contains(ip)),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Where a resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentitySource<'a> {
    ForwardedFor(&'a str),
    RealIp(&'a str),
    NotFound,
}

/// Look at proxy headers only. Borrowed slices, no allocation.
fn identity_from_headers(headers: &HeaderMap) -> IdentitySource<'_> {
    // "client, proxy1, proxy2": the first entry is the client
    if let Some(forwarded) = headers.get(FORWARDED_FOR_HEADER)
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return IdentitySource::ForwardedFor(first);
    }

    if let Some(real_ip) = headers.get(REAL_IP_HEADER)
        && let Ok(value) = real_ip.to_str().map(str::trim)
        && !value.is_empty()
    {
        return IdentitySource::RealIp(value);
    }

    IdentitySource::NotFound
}

/// Resolve the identity for a request from its headers and peer address.
pub fn resolve_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> Cow<'static, str> {
    let peer_ip = peer.map(|addr| addr.ip());

    if trusted.trusts(peer_ip) {
        match identity_from_headers(headers) {
            IdentitySource::ForwardedFor(ip) | IdentitySource::RealIp(ip) => {
                return Cow::Owned(ip.to_string());
            }
            IdentitySource::NotFound => {}
        }
    } else if identity_from_headers(headers) != IdentitySource::NotFound {
        debug!(
            peer = ?peer_ip,
            "Ignoring proxy headers from untrusted peer"
        );
    }

    match peer_ip {
        Some(ip) => Cow::Owned(ip.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Key under which rate-limit and abuse state is tracked for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Trusted proxies are read from request extensions so the extractor works
/// with any router state; the router installs them with `Extension`.
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let identity = match parts.extensions.get::<TrustedProxies>() {
            Some(trusted) => resolve_identity(&parts.headers, peer, trusted),
            None => resolve_identity(&parts.headers, peer, &TrustedProxies::default()),
        };

        Ok(Self(identity.into_owned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    fn resolve(pairs: &[(&'static str, &'static str)], peer: Option<SocketAddr>) -> String {
        resolve_identity(&headers(pairs), peer, &TrustedProxies::default()).into_owned()
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let id = resolve(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1")], None);
        assert_eq!(id, "192.168.1.1");
    }

    #[test]
    fn test_forwarded_for_trims_whitespace() {
        let id = resolve(&[("x-forwarded-for", "  203.0.113.50  , 10.0.0.1")], None);
        assert_eq!(id, "203.0.113.50");
    }

    #[test]
    fn test_real_ip_used_without_forwarded_for() {
        let id = resolve(&[("x-real-ip", " 192.168.1.7 ")], peer("10.1.1.1:4000"));
        assert_eq!(id, "192.168.1.7");
    }

    #[test]
    fn test_forwarded_for_beats_real_ip() {
        let id = resolve(
            &[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "192.168.1.1")],
            None,
        );
        assert_eq!(id, "10.0.0.1");
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let id = resolve(&[], peer("198.51.100.4:51234"));
        assert_eq!(id, "198.51.100.4");
    }

    #[test]
    fn test_unknown_without_any_source() {
        let id = resolve_identity(&HeaderMap::new(), None, &TrustedProxies::default());
        assert_eq!(id, UNKNOWN_IP);
        assert!(matches!(id, Cow::Borrowed(_)));
    }

    #[test]
    fn test_header_value_not_validated() {
        // Ports, garbage and IPv6 pass through untouched
        assert_eq!(
            resolve(&[("x-forwarded-for", "192.168.1.1:8080, 10.0.0.1")], None),
            "192.168.1.1:8080"
        );
        assert_eq!(resolve(&[("x-forwarded-for", "not-an-ip")], None), "not-an-ip");
        assert_eq!(resolve(&[("x-real-ip", "::1")], None), "::1");
    }

    #[test]
    fn test_blank_header_falls_through() {
        let id = resolve(
            &[("x-forwarded-for", " , 10.0.0.1"), ("x-real-ip", "192.168.1.9")],
            None,
        );
        assert_eq!(id, "192.168.1.9");
        assert_eq!(resolve(&[("x-real-ip", "  ")], peer("10.2.2.2:1")), "10.2.2.2");
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let trusted = TrustedProxies::new(&["10.0.0.0/8".to_string()]);
        let map = headers(&[("x-forwarded-for", "1.2.3.4")]);

        let from_proxy = resolve_identity(&map, peer("10.0.0.5:80"), &trusted);
        assert_eq!(from_proxy, "1.2.3.4");

        let direct = resolve_identity(&map, peer("8.8.8.8:80"), &trusted);
        assert_eq!(direct, "8.8.8.8");
    }

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len, 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len, 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len, 32);
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let range = CidrRange::parse("192.168.1.0/24").unwrap();
        assert!(range.contains("192.168.1.254".parse().unwrap()));
        assert!(!range.contains("192.168.2.1".parse().unwrap()));
        assert!(!range.contains("::1".parse().unwrap()));

        let everything = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(everything.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxies_empty_trusts_all() {
        let trusted = TrustedProxies::new(&[]);
        assert!(!trusted.is_enabled());
        assert!(trusted.trusts(Some("8.8.8.8".parse().unwrap())));
        assert!(trusted.trusts(None));
    }

    #[test]
    fn test_trusted_proxies_skips_invalid_entries() {
        let trusted = TrustedProxies::new(&["bogus".to_string(), "172.16.0.0/12".to_string()]);
        assert!(trusted.is_enabled());
        assert!(trusted.trusts(Some("172.31.255.255".parse().unwrap())));
        assert!(!trusted.trusts(Some("192.168.1.1".parse().unwrap())));
    }
}
