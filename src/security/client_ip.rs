//! Client key extraction and sanitization.
//!
//! The limiter keys its state by client address, so the key must be stable
//! for one client and bounded in size no matter what a request carries.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::{IpAddr, SocketAddr};

const MAX_KEY_LEN: usize = 64;
const UNKNOWN_CLIENT: &str = "unknown";

/// Parse an address, accepting bracketed IPv6 and `ip:port` forms.
pub fn parse_client_ip(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim();
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = trimmed.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .and_then(|s| s.parse::<IpAddr>().ok())
}

/// Normalize an arbitrary client identifier into a bounded map key.
pub fn sanitize_client_key(raw: &str) -> String {
    if let Some(ip) = parse_client_ip(raw) {
        return ip.to_string();
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '_' | '-'))
        .take(MAX_KEY_LEN)
        .collect();

    if cleaned.is_empty() {
        UNKNOWN_CLIENT.to_string()
    } else {
        cleaned
    }
}

/// Derive the client key for a request.
///
/// With `trust_forwarded_for` the first valid `X-Forwarded-For` hop wins;
/// otherwise the peer address of the connection is used.
pub fn client_key(req: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(parse_client_ip);
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
