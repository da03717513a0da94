//! Gateway error types and the stable JSON error envelope.
//!
//! Every error the gateway generates itself (as opposed to responses copied
//! from an upstream) is rendered through one envelope so that clients can
//! dispatch on the `code` field alone:
//!
//! ```json
//! {
//!   "error": "AUTHENTICATION_ERROR",
//!   "code": "MISSING_TOKEN",
//!   "message": "authentication required",
//!   "timestamp": "2024-03-15T10:30:00Z"
//! }
//! ```
//!
//! `message` is for humans and deliberately never explains which internal
//! check failed or which instance was selected.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

/// Errors produced by the gateway itself.
///
/// Variants map 1:1 onto the stable `code` values of the error envelope.
/// Upstream 4xx responses are not represented here: they pass through to the
/// client verbatim.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No bearer token in the Authorization header or the access cookie.
    #[error("authentication required")]
    MissingToken,

    /// Token present but failed signature, issuer, audience, or time checks.
    /// The message never discloses which check failed.
    #[error("invalid or expired token")]
    InvalidToken,

    /// Protected internal route reached without a user token or a
    /// mesh-injected peer identity.
    #[error("no peer identity on internal route")]
    NoMeshIdentity,

    /// Authenticated identity lacks a required role.
    #[error("role '{role}' required")]
    RoleRequired { role: String },

    /// Authenticated identity lacks a required permission.
    #[error("permission '{permission}' required")]
    PermissionRequired { permission: String },

    /// Path-scoped resource belongs to a different user.
    #[error("access restricted to the resource owner")]
    OwnershipRequired,

    /// Sliding-window or burst admission failed.
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u64,
        window_secs: u64,
        retry_after_secs: u64,
    },

    /// First path segment does not name a registered service.
    #[error("unknown service '{service}'")]
    ServiceNotFound { service: String },

    /// No healthy, circuit-closed instance (and no probe slot) in the pool.
    #[error("no instances available for '{service}'")]
    NoInstancesAvailable { service: String },

    /// Terminal upstream failure (transport error or 5xx) after any retries.
    #[error("upstream service error")]
    ServiceError { service: String, attempts: u32 },

    /// Per-attempt or overall deadline elapsed while calling upstream.
    #[error("upstream service timeout")]
    ServiceTimeout { service: String, attempts: u32 },

    /// Request body exceeded the buffering cap.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Client body could not be read.
    #[error("request body could not be read")]
    BodyRead,

    /// CSRF header token absent or not matching the cookie-bound token.
    #[error("csrf token missing or mismatched")]
    CsrfMismatch,

    /// Panic or other programmer error, normalized by the recovery layer.
    #[error("internal server error")]
    Internal,
}

impl GatewayError {
    /// Stable machine-readable code; the sole programmatic signal.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingToken => "MISSING_TOKEN",
            GatewayError::InvalidToken => "INVALID_TOKEN",
            GatewayError::NoMeshIdentity => "NO_MESH_IDENTITY",
            GatewayError::RoleRequired { .. } => "ROLE_REQUIRED",
            GatewayError::PermissionRequired { .. } => "PERMISSION_REQUIRED",
            GatewayError::OwnershipRequired => "RESOURCE_OWNERSHIP_REQUIRED",
            GatewayError::RateLimited { .. } => "TOO_MANY_REQUESTS",
            GatewayError::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            GatewayError::NoInstancesAvailable { .. } => "NO_INSTANCES_AVAILABLE",
            GatewayError::ServiceError { .. } => "SERVICE_ERROR",
            GatewayError::ServiceTimeout { .. } => "SERVICE_TIMEOUT",
            GatewayError::BodyTooLarge { .. } | GatewayError::BodyRead => "BODY_READ_ERROR",
            GatewayError::CsrfMismatch => "CSRF_TOKEN_MISMATCH",
            GatewayError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Envelope category grouping related codes.
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::MissingToken
            | GatewayError::InvalidToken
            | GatewayError::NoMeshIdentity => "AUTHENTICATION_ERROR",
            GatewayError::RoleRequired { .. }
            | GatewayError::PermissionRequired { .. }
            | GatewayError::OwnershipRequired => "AUTHORIZATION_ERROR",
            GatewayError::RateLimited { .. } => "RATE_LIMIT_ERROR",
            GatewayError::ServiceNotFound { .. } => "ROUTING_ERROR",
            GatewayError::NoInstancesAvailable { .. }
            | GatewayError::ServiceError { .. }
            | GatewayError::ServiceTimeout { .. } => "UPSTREAM_ERROR",
            GatewayError::BodyTooLarge { .. } | GatewayError::BodyRead => "VALIDATION_ERROR",
            GatewayError::CsrfMismatch => "SECURITY_ERROR",
            GatewayError::Internal => "INTERNAL_ERROR",
        }
    }

    fn service(&self) -> Option<&str> {
        match self {
            GatewayError::ServiceNotFound { service }
            | GatewayError::NoInstancesAvailable { service }
            | GatewayError::ServiceError { service, .. }
            | GatewayError::ServiceTimeout { service, .. } => Some(service),
            _ => None,
        }
    }

    fn attempts(&self) -> Option<u32> {
        match self {
            GatewayError::ServiceError { attempts, .. }
            | GatewayError::ServiceTimeout { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Renders the JSON envelope body for this error.
    pub fn envelope(&self) -> serde_json::Value {
        let mut body = json!({
            "error": self.category(),
            "code": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(service) = self.service() {
            body["service"] = json!(service);
        }
        if let Some(attempts) = self.attempts() {
            body["attempts"] = json!(attempts);
        }
        if let GatewayError::RateLimited {
            limit,
            window_secs,
            retry_after_secs,
        } = self
        {
            body["limit"] = json!(limit);
            body["window"] = json!(window_secs);
            body["retry_after"] = json!(retry_after_secs);
        }
        body
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingToken
            | GatewayError::InvalidToken
            | GatewayError::NoMeshIdentity => StatusCode::UNAUTHORIZED,
            GatewayError::RoleRequired { .. }
            | GatewayError::PermissionRequired { .. }
            | GatewayError::OwnershipRequired
            | GatewayError::CsrfMismatch => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServiceNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::NoInstancesAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ServiceError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ServiceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::BodyRead => StatusCode::BAD_REQUEST,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let GatewayError::RateLimited {
            retry_after_secs, ..
        } = self
        {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }
        builder.json(self.envelope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GatewayError::MissingToken.code(), "MISSING_TOKEN");
        assert_eq!(GatewayError::CsrfMismatch.code(), "CSRF_TOKEN_MISMATCH");
        assert_eq!(
            GatewayError::ServiceNotFound {
                service: "users".into()
            }
            .code(),
            "SERVICE_NOT_FOUND"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::NoInstancesAvailable {
                service: "chat".into()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::ServiceTimeout {
                service: "chat".into(),
                attempts: 2
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::BodyTooLarge { limit: 1024 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn envelope_carries_service_and_attempts() {
        let err = GatewayError::ServiceError {
            service: "users".into(),
            attempts: 3,
        };
        let body = err.envelope();
        assert_eq!(body["error"], "UPSTREAM_ERROR");
        assert_eq!(body["code"], "SERVICE_ERROR");
        assert_eq!(body["service"], "users");
        assert_eq!(body["attempts"], 3);
    }

    #[test]
    fn rate_limit_envelope_has_quota_fields() {
        let err = GatewayError::RateLimited {
            limit: 5,
            window_secs: 60,
            retry_after_secs: 42,
        };
        let body = err.envelope();
        assert_eq!(body["code"], "TOO_MANY_REQUESTS");
        assert_eq!(body["limit"], 5);
        assert_eq!(body["window"], 60);
        assert_eq!(body["retry_after"], 42);
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("Retry-After"));
    }
}
