//! Configuration data model for the gateway.
//!
//! Settings are loaded once at boot from a JSON file (see
//! [`crate::config::settings::load_settings`]), validated, and then treated
//! as immutable. Reconfiguration is a restart-in-place.

use serde::{Deserialize, Serialize};

fn default_weight() -> u32 {
    1
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_request_timeout() -> u64 {
    60
}

fn default_per_attempt_timeout() -> u64 {
    30
}

fn default_cookie_name() -> String {
    "link_access_token".to_string()
}

/// Deployment environment tag. Drives CORS leniency, HSTS, and CSP strictness.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// Listen address for the gateway itself.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListenSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One verification key, addressed by the token's `kid` header.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentityKey {
    pub kid: String,
    /// RSA public key in PEM form (RS256 verification only).
    pub public_key_pem: String,
}

/// Token-verification settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentitySettings {
    /// Expected `iss` claim.
    pub issuer: String,
    /// Cookie consulted when no Authorization header is present.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub cookie_secure: bool,
    /// Path prefixes that bypass authentication entirely.
    #[serde(default)]
    pub public_paths: Vec<String>,
    /// Verification keys, looked up by `kid`.
    #[serde(default)]
    pub keys: Vec<IdentityKey>,
}

/// CORS allow-list. In development every origin is echoed.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CorsSettings {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// One rate-limit rule: requests matching `pattern` (path prefix) share the
/// quota `{limit, window, burst}` per identity key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitRule {
    pub pattern: String,
    pub limit: u64,
    pub window_secs: u64,
    #[serde(default)]
    pub burst: u64,
}

/// Rate limiting configuration: a default quota, optional per-prefix
/// overrides, and an optional distributed counter-store endpoint. Without an
/// endpoint the in-process limiter is used.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    pub default: RateLimitRule,
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
    #[serde(default)]
    pub counter_store_url: Option<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default: RateLimitRule {
                pattern: String::new(),
                limit: 100,
                window_secs: 60,
                burst: 20,
            },
            rules: Vec::new(),
            counter_store_url: None,
        }
    }
}

/// Instance selection strategy for one service pool.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    Random,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::RoundRobin
    }
}

/// One addressable upstream instance.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstanceSettings {
    pub id: String,
    /// Base URL including scheme, e.g. `http://users-1:8080`.
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Per-instance circuit breaker thresholds.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures that trip the breaker regardless of ratio.
    pub max_failures: u32,
    /// Failure ratio over the rolling window that trips the breaker.
    pub failure_ratio: f64,
    /// Minimum rolling-window requests before the ratio is considered.
    pub min_requests: u32,
    /// Seconds to hold the breaker open before permitting a probe.
    pub reset_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            failure_ratio: 0.5,
            min_requests: 10,
            reset_timeout_secs: 30,
        }
    }
}

/// Retry policy for one service.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    /// Backoff delay before attempt `attempt + 1`, doubling from the base
    /// and capped at `max_delay_ms`. Jitter is applied by the retrier.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        exp.min(self.max_delay_ms)
    }
}

/// One logical upstream service.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServiceSettings {
    pub name: String,
    #[serde(default)]
    pub strategy: Strategy,
    pub instances: Vec<InstanceSettings>,
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_per_attempt_timeout")]
    pub per_attempt_timeout_secs: u64,
}

/// Top-level gateway configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub listen: ListenSettings,
    pub identity: IdentitySettings,
    #[serde(default)]
    pub cors: CorsSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Cap on buffered request bodies, in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Overall per-request wall clock, including retries.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub services: Vec<ServiceSettings>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetrySettings {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 500,
            jitter: false,
        };
        assert_eq!(retry.backoff_ms(0), 100);
        assert_eq!(retry.backoff_ms(1), 200);
        assert_eq!(retry.backoff_ms(2), 400);
        assert_eq!(retry.backoff_ms(3), 500);
        assert_eq!(retry.backoff_ms(10), 500);
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let raw = r#"{
            "identity": {"issuer": "link-auth"},
            "services": [
                {"name": "users",
                 "instances": [{"id": "users-1", "url": "http://users-1:8080"}]}
            ]
        }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.environment, Environment::Development);
        assert_eq!(settings.listen.port, 8080);
        assert_eq!(settings.body_limit_bytes, 1024 * 1024);
        assert_eq!(settings.services[0].strategy, Strategy::RoundRobin);
        assert_eq!(settings.services[0].instances[0].weight, 1);
        assert_eq!(settings.services[0].circuit_breaker.min_requests, 10);
        assert_eq!(settings.rate_limit.default.limit, 100);
        assert_eq!(settings.identity.cookie_name, "link_access_token");
    }
}
