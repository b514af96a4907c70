use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;
use tracing::warn;

/// Parse a comma-separated CIDR list (`WILDKEY_TRUSTED_PROXIES`). Bare
/// addresses are accepted as single-host networks; unparseable entries are
/// skipped with a warning.
pub fn parse_trusted_proxies(raw: &str) -> Vec<IpNet> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let parsed = s
                .parse::<IpNet>()
                .ok()
                .or_else(|| s.parse::<IpAddr>().ok().map(IpNet::from));
            if parsed.is_none() {
                warn!(entry = s, "ignoring invalid trusted proxy entry");
            }
            parsed
        })
        .collect()
}

/// Resolve the caller address used for key matching.
///
/// The socket peer is authoritative unless it is a trusted proxy, in which
/// case the first `X-Forwarded-For` hop is used. Returns an empty string when
/// the peer is unknown.
pub fn resolve_caller(peer: Option<IpAddr>, headers: &HeaderMap, trusted: &[IpNet]) -> String {
    let Some(peer) = peer.map(|ip| ip.to_canonical()) else {
        return String::new();
    };

    if trusted.iter().any(|net| net.contains(&peer)) {
        let forwarded = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_owned();
        }
    }

    peer.to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn xff(value: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("X-Forwarded-For", HeaderValue::from_static(value));
        h
    }

    #[test]
    fn peer_used_when_no_proxies_trusted() {
        let peer = "203.0.113.5".parse().ok();
        assert_eq!(resolve_caller(peer, &xff("198.51.100.1"), &[]), "203.0.113.5");
    }

    #[test]
    fn forwarded_hop_used_from_trusted_proxy() {
        let trusted = parse_trusted_proxies("10.0.0.0/8");
        let peer = "10.1.2.3".parse().ok();
        assert_eq!(
            resolve_caller(peer, &xff("203.0.113.5, 10.1.2.3"), &trusted),
            "203.0.113.5"
        );
    }

    #[test]
    fn trusted_proxy_without_header_falls_back_to_peer() {
        let trusted = parse_trusted_proxies("10.0.0.0/8");
        let peer = "10.1.2.3".parse().ok();
        assert_eq!(resolve_caller(peer, &HeaderMap::new(), &trusted), "10.1.2.3");
    }

    #[test]
    fn ipv4_mapped_peer_is_canonicalised() {
        let peer = "::ffff:203.0.113.5".parse().ok();
        assert_eq!(resolve_caller(peer, &HeaderMap::new(), &[]), "203.0.113.5");
    }

    #[test]
    fn unknown_peer_is_empty() {
        assert_eq!(resolve_caller(None, &xff("203.0.113.5"), &[]), "");
    }

    #[test]
    fn parse_accepts_bare_addresses_and_skips_garbage() {
        let nets = parse_trusted_proxies("127.0.0.1, ::1/128, nonsense,,");
        assert_eq!(nets.len(), 2);
        assert!(nets[0].contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
    }
}
