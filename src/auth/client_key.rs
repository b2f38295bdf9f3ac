//! Client identity for rate limiting.

use std::net::{IpAddr, SocketAddr};

/// Derive the rate limit key for a request.
///
/// Precedence:
/// 1. First address in `X-Forwarded-For`
/// 2. `X-Real-IP`
/// 3. Host part of the peer address
///
/// Header values that do not parse as an IP address are ignored. If the peer
/// address cannot be parsed either it is used verbatim, so even a degenerate
/// request lands in some bucket.
pub fn client_key(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote_addr: &str,
) -> String {
    if let Some(ip) = forwarded_for
        .and_then(|value| value.split(',').next())
        .and_then(parse_ip)
    {
        return ip.to_string();
    }

    if let Some(ip) = real_ip.and_then(parse_ip) {
        return ip.to_string();
    }

    peer_host(remote_addr).unwrap_or_else(|| remote_addr.trim().to_string())
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

fn peer_host(remote_addr: &str) -> Option<String> {
    let remote_addr = remote_addr.trim();

    if let Ok(addr) = remote_addr.parse::<SocketAddr>() {
        return Some(addr.ip().to_string());
    }
    if let Some(ip) = parse_ip(remote_addr) {
        return Some(ip.to_string());
    }

    // "host:port" with a non-IP host, or "[v6]" without a port
    let host = match remote_addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => remote_addr,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        None
    } else {
        Some(parse_ip(host).map_or_else(|| host.to_string(), |ip| ip.to_string()))
    }
}
