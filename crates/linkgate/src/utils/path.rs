//! Path resolution helpers for the proxy.
//!
//! Inbound paths have the form `/<service-name>[/<rest>]`. The first
//! segment names the target service (an optional `-svc` suffix is accepted
//! so both `/users/me` and `/users-svc/me` resolve to `users`); the
//! remainder plus the query string is appended to the selected instance URL.

/// Splits an inbound path into `(service_name, rest)`.
///
/// `rest` always starts with `/` ("" becomes "/"). Returns `None` for the
/// root path or an empty first segment.
pub fn split_service_path(path: &str) -> Option<(&str, String)> {
    let trimmed = path.strip_prefix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    let (segment, rest) = match trimmed.find('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };
    if segment.is_empty() {
        return None;
    }
    let service = segment.strip_suffix("-svc").unwrap_or(segment);
    if service.is_empty() {
        return None;
    }
    let rest = if rest.is_empty() { "/".to_string() } else { rest.to_string() };
    Some((service, rest))
}

/// Builds the upstream target URL from an instance base URL, the remainder
/// path, and the original query string.
pub fn build_target_url(instance_url: &str, rest: &str, query: Option<&str>) -> String {
    let base = instance_url.trim_end_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base, rest, q),
        _ => format!("{}{}", base, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_service_and_rest() {
        assert_eq!(
            split_service_path("/users/me"),
            Some(("users", "/me".to_string()))
        );
        assert_eq!(
            split_service_path("/users"),
            Some(("users", "/".to_string()))
        );
        assert_eq!(
            split_service_path("/chat/rooms/42/messages"),
            Some(("chat", "/rooms/42/messages".to_string()))
        );
    }

    #[test]
    fn strips_svc_suffix() {
        assert_eq!(
            split_service_path("/users-svc/me"),
            Some(("users", "/me".to_string()))
        );
    }

    #[test]
    fn rejects_root_and_empty_segments() {
        assert_eq!(split_service_path("/"), None);
        assert_eq!(split_service_path(""), None);
        assert_eq!(split_service_path("//x"), None);
    }

    #[test]
    fn builds_target_urls() {
        assert_eq!(
            build_target_url("http://users-1:8080", "/me", None),
            "http://users-1:8080/me"
        );
        assert_eq!(
            build_target_url("http://users-1:8080/", "/me", Some("full=1")),
            "http://users-1:8080/me?full=1"
        );
        assert_eq!(
            build_target_url("http://users-1:8080", "/", None),
            "http://users-1:8080/"
        );
    }
}
