//! Header hygiene for proxied requests and responses.
//!
//! Hop-by-hop headers are connection-scoped and must not cross the gateway
//! in either direction. The filter is the fixed RFC 7230 list; header names
//! listed inside a `Connection` header are deliberately NOT stripped
//! (conservative policy: only the fixed set is removed).

use actix_web::http::header::HeaderMap as ActixHeaderMap;
use actix_web::HttpResponseBuilder;
use reqwest::header::{
    HeaderMap as UpstreamHeaderMap, HeaderName as UpstreamHeaderName,
    HeaderValue as UpstreamHeaderValue,
};

/// The fixed hop-by-hop set, lowercase.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// True when `name` (any case) is in the fixed hop-by-hop set.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copies client request headers for the upstream call, dropping the
/// hop-by-hop set and `Host` (the client library derives it from the target
/// URL). Unparseable names or values are skipped rather than failing the
/// request.
pub fn filter_request_headers(original: &ActixHeaderMap) -> UpstreamHeaderMap {
    let mut upstream = UpstreamHeaderMap::with_capacity(original.len());

    for (key, value) in original {
        let name = key.as_str();
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) = (
            UpstreamHeaderName::from_bytes(name.as_bytes()),
            UpstreamHeaderValue::from_bytes(value.as_bytes()),
        ) {
            upstream.append(header_name, header_value);
        }
    }

    upstream
}

/// Copies upstream response headers onto the client response, dropping the
/// hop-by-hop set.
pub fn apply_response_headers(builder: &mut HttpResponseBuilder, upstream: &UpstreamHeaderMap) {
    for (key, value) in upstream {
        if is_hop_by_hop(key.as_str()) {
            continue;
        }
        if let Ok(header_value) =
            actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
        {
            builder.append_header((key.as_str(), header_value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn actix_headers(pairs: &[(&str, &str)]) -> ActixHeaderMap {
        let mut map = ActixHeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn fixed_set_is_recognized_case_insensitively() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("x-custom"));
    }

    #[test]
    fn request_filter_strips_hop_by_hop_and_host() {
        let src = actix_headers(&[
            ("Connection", "keep-alive, X-Custom"),
            ("Transfer-Encoding", "chunked"),
            ("Host", "gateway.link.example"),
            ("X-Custom", "1"),
            ("Accept", "application/json"),
        ]);
        let filtered = filter_request_headers(&src);
        assert!(filtered.get("connection").is_none());
        assert!(filtered.get("transfer-encoding").is_none());
        assert!(filtered.get("host").is_none());
        // Named in Connection but not in the fixed set: passes through.
        assert_eq!(filtered.get("x-custom").unwrap(), "1");
        assert_eq!(filtered.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn filtering_is_idempotent() {
        let src = actix_headers(&[
            ("Connection", "keep-alive"),
            ("X-Custom", "1"),
            ("Accept", "application/json"),
        ]);
        let once = filter_request_headers(&src);

        let mut back = ActixHeaderMap::new();
        for (k, v) in &once {
            back.append(
                HeaderName::from_bytes(k.as_str().as_bytes()).unwrap(),
                HeaderValue::from_bytes(v.as_bytes()).unwrap(),
            );
        }
        let twice = filter_request_headers(&back);
        assert_eq!(once.len(), twice.len());
        for (k, v) in &once {
            assert_eq!(twice.get(k.as_str()).unwrap(), v);
        }
    }
}
