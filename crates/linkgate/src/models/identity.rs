//! Request identities: authenticated users, mesh-authenticated peer
//! services, and anonymous callers.
//!
//! An [`Identity`] is attached to the request by the auth middleware and
//! consumed by the rate limiter (key derivation) and the proxy (identity
//! propagation headers). It lives exactly as long as one request.

use crate::models::error::GatewayError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use uuid::Uuid;

/// Client platform, taken from the `X-Platform` request header.
///
/// Mobile platforms get shorter access-token lifetimes from the issuer; the
/// gateway only uses the platform to pick the expected token audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Ios,
    Android,
    Mobile,
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Web
    }
}

impl Platform {
    /// Parses the platform hint header; unknown values fall back to web.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("ios") => Platform::Ios,
            Some("android") => Platform::Android,
            Some("mobile") => Platform::Mobile,
            _ => Platform::Web,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Mobile => "mobile",
        }
    }

    /// Audiences accepted on a token presented from this platform.
    ///
    /// Tokens are issued for `link-app` (any platform) or for a
    /// platform-qualified audience like `link-app-ios`; a token minted for a
    /// different platform is rejected.
    pub fn accepted_audiences(&self) -> [String; 2] {
        ["link-app".to_string(), format!("link-app-{}", self.as_str())]
    }
}

/// Verified claims of an access token.
///
/// Immutable once decoded; the auth middleware copies what it needs into
/// [`Identity::User`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id.
    pub sub: Uuid,
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub platform: Platform,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub exp: i64,
    pub aud: String,
    pub iss: String,
    /// Token id, used for propagation and audit joining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// The authenticated principal of one request.
#[derive(Debug, Clone)]
pub enum Identity {
    /// End user authenticated by a bearer token.
    User {
        user_id: Uuid,
        email: String,
        username: String,
        roles: HashSet<String>,
        permissions: HashSet<String>,
        platform: Platform,
        token_id: Option<String>,
    },
    /// Peer service authenticated by the mesh sidecar.
    Service {
        service_name: String,
        mesh_identity: String,
    },
    /// No credentials presented (public allow-listed paths only).
    Anonymous,
}

impl Identity {
    /// Builds a user identity from verified token claims.
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Identity::User {
            user_id: claims.sub,
            email: claims.email.clone(),
            username: claims.username.clone(),
            roles: claims.roles.iter().cloned().collect(),
            permissions: claims.permissions.iter().cloned().collect(),
            platform: claims.platform,
            token_id: claims.jti.clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Identity::Anonymous)
    }

    pub fn has_role(&self, role: &str) -> bool {
        match self {
            Identity::User { roles, .. } => roles.contains(role),
            _ => false,
        }
    }

    pub fn has_any_role<'a, I: IntoIterator<Item = &'a str>>(&self, wanted: I) -> bool {
        wanted.into_iter().any(|r| self.has_role(r))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        match self {
            Identity::User { permissions, .. } => permissions.contains(permission),
            _ => false,
        }
    }

    /// Rate-limit key for this identity, in precedence order:
    /// user id, then service name, then the caller-supplied client IP.
    pub fn rate_limit_key(&self, client_ip: &str) -> String {
        match self {
            Identity::User { user_id, .. } => format!("user:{}", user_id),
            Identity::Service { service_name, .. } => format!("svc:{}", service_name),
            Identity::Anonymous => format!("ip:{}", client_ip),
        }
    }
}

/// Route guard: identity must carry `role`.
pub fn require_role(identity: &Identity, role: &str) -> Result<(), GatewayError> {
    if identity.has_role(role) {
        Ok(())
    } else {
        Err(GatewayError::RoleRequired { role: role.into() })
    }
}

/// Route guard: identity must carry at least one of `roles`.
pub fn require_any_role(identity: &Identity, roles: &[&str]) -> Result<(), GatewayError> {
    if identity.has_any_role(roles.iter().copied()) {
        Ok(())
    } else {
        Err(GatewayError::RoleRequired {
            role: roles.join("|"),
        })
    }
}

/// Route guard: identity must carry `permission`.
pub fn require_permission(identity: &Identity, permission: &str) -> Result<(), GatewayError> {
    if identity.has_permission(permission) {
        Ok(())
    } else {
        Err(GatewayError::PermissionRequired {
            permission: permission.into(),
        })
    }
}

/// Resource-ownership guard: the path's user id must match the
/// authenticated subject. Moderators are exempt.
pub fn require_ownership(identity: &Identity, path_user_id: &Uuid) -> Result<(), GatewayError> {
    match identity {
        Identity::User { user_id, .. } if user_id == path_user_id => Ok(()),
        Identity::User { roles, .. } if roles.contains("moderator") => Ok(()),
        _ => Err(GatewayError::OwnershipRequired),
    }
}

/// Fixed mapping from mesh principals (SPIFFE-style identifiers injected by
/// the sidecar) to logical service names. East-west callers not in this
/// table are rejected.
static MESH_PRINCIPALS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("cluster.local/ns/link/sa/user-service", "users"),
        ("cluster.local/ns/link/sa/chat-service", "chat"),
        ("cluster.local/ns/link/sa/ai-service", "ai"),
        ("cluster.local/ns/link/sa/discovery-service", "discovery"),
        ("cluster.local/ns/link/sa/search-service", "search"),
    ])
});

/// Resolves a mesh principal to a service identity, if the principal is
/// known and the connection was flagged secure by the sidecar.
pub fn mesh_identity(principal: &str, connection_secure: bool) -> Option<Identity> {
    if !connection_secure {
        return None;
    }
    MESH_PRINCIPALS
        .get(principal)
        .map(|service_name| Identity::Service {
            service_name: (*service_name).to_string(),
            mesh_identity: principal.to_string(),
        })
}
