//! Response hardening headers.

use crate::models::settings::Environment;
use actix_web::middleware::DefaultHeaders;

/// Security headers applied to every response.
///
/// HSTS is production-only (it would pin localhost during development) and
/// the CSP is relaxed in development so local tooling can inline scripts.
pub fn security_headers(environment: Environment) -> DefaultHeaders {
    let headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"))
        .add(("Permissions-Policy", "geolocation=(), microphone=(), camera=()"));

    match environment {
        Environment::Production => headers
            .add((
                "Strict-Transport-Security",
                "max-age=31536000; includeSubDomains",
            ))
            .add(("Content-Security-Policy", "default-src 'self'")),
        Environment::Development => headers.add((
            "Content-Security-Policy",
            "default-src 'self' 'unsafe-inline' data:",
        )),
    }
}
