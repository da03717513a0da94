//! Client address derivation.
//!
//! The gateway sits behind a trusted edge that appends forwarding headers,
//! so the true client address is taken from, in order: the leftmost
//! `X-Forwarded-For` entry, `X-Real-IP`, then the peer address with any
//! port stripped.

use actix_web::http::header::HeaderMap;

/// Derives the client IP for rate limiting and forwarding headers.
pub fn derive_client_ip(headers: &HeaderMap, peer_addr: Option<&str>) -> String {
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer_addr.map(strip_port).unwrap_or_else(|| "unknown".to_string())
}

/// Strips a trailing `:port` from a socket address, leaving bracketed IPv6
/// literals intact.
fn strip_port(addr: &str) -> String {
    if let Some(stripped) = addr.strip_prefix('[') {
        // "[::1]:8080" -> "::1"
        if let Some(end) = stripped.find(']') {
            return stripped[..end].to_string();
        }
    }
    match addr.rfind(':') {
        // Bare IPv6 without brackets has multiple colons; leave it alone.
        Some(idx) if addr[..idx].contains(':') => addr.to_string(),
        Some(idx) => addr[..idx].to_string(),
        None => addr.to_string(),
    }
}
