//! Comprehensive configuration validation with detailed reporting.
//!
//! Errors prevent boot; warnings and recommendations are logged so that a
//! sloppy but workable configuration still starts.

use crate::models::settings::{Environment, Settings};
use log::{info, warn};
use std::collections::HashSet;

/// Result of configuration validation, categorized by severity.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }

    /// Logs warnings and recommendations (errors are the caller's problem).
    pub fn log(&self) {
        for warning in &self.warnings {
            warn!("config warning: {}", warning);
        }
        for recommendation in &self.recommendations {
            info!("config recommendation: {}", recommendation);
        }
    }
}

/// Validates whole-settings invariants before the gateway wires itself up.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_services(settings, &mut result);
        Self::validate_identity(settings, &mut result);
        Self::validate_rate_limits(settings, &mut result);
        Self::validate_limits(settings, &mut result);

        result
    }

    fn validate_services(settings: &Settings, result: &mut ValidationResult) {
        if settings.services.is_empty() {
            result.add_error("at least one service must be configured".into());
            return;
        }

        let mut names = HashSet::new();
        let mut instance_ids = HashSet::new();
        for service in &settings.services {
            if service.name.is_empty() || service.name.contains('/') {
                result.add_error(format!("invalid service name '{}'", service.name));
            }
            if !names.insert(&service.name) {
                result.add_error(format!("duplicate service name '{}'", service.name));
            }
            if service.instances.is_empty() {
                result.add_error(format!("service '{}' has no instances", service.name));
            }
            for instance in &service.instances {
                if !instance_ids.insert(&instance.id) {
                    result.add_error(format!("duplicate instance id '{}'", instance.id));
                }
                if !instance.url.starts_with("http://") && !instance.url.starts_with("https://") {
                    result.add_error(format!(
                        "instance '{}' url must start with http:// or https://",
                        instance.id
                    ));
                }
                if instance.weight == 0 {
                    result.add_error(format!("instance '{}' weight must be >= 1", instance.id));
                }
            }

            let breaker = &service.circuit_breaker;
            if breaker.failure_ratio <= 0.0 || breaker.failure_ratio > 1.0 {
                result.add_error(format!(
                    "service '{}' failure_ratio must be in (0, 1]",
                    service.name
                ));
            }
            if breaker.min_requests == 0 {
                result.add_warning(format!(
                    "service '{}' min_requests of 0 trips the breaker on the first failure",
                    service.name
                ));
            }

            let retry = &service.retry;
            if retry.max_attempts == 0 {
                result.add_error(format!(
                    "service '{}' retry max_attempts must be >= 1",
                    service.name
                ));
            }
            if retry.max_attempts > 10 {
                result.add_error(format!(
                    "service '{}' retry max_attempts must not exceed 10",
                    service.name
                ));
            }
            if retry.base_delay_ms > retry.max_delay_ms {
                result.add_error(format!(
                    "service '{}' retry base_delay_ms exceeds max_delay_ms",
                    service.name
                ));
            }
            if service.per_attempt_timeout_secs == 0 {
                result.add_error(format!(
                    "service '{}' per_attempt_timeout_secs must be >= 1",
                    service.name
                ));
            }
            if service.per_attempt_timeout_secs > settings.request_timeout_secs {
                result.add_warning(format!(
                    "service '{}' per-attempt timeout exceeds the overall request timeout",
                    service.name
                ));
            }
        }
    }

    /// True when the public allow-list covers every configured service's
    /// path space, so no verification key is ever consulted.
    fn all_services_public(settings: &Settings) -> bool {
        settings.services.iter().all(|service| {
            let path = format!("/{}/", service.name);
            settings
                .identity
                .public_paths
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
        })
    }

    fn validate_identity(settings: &Settings, result: &mut ValidationResult) {
        let identity = &settings.identity;
        if identity.issuer.is_empty() {
            result.add_error("identity issuer must not be empty".into());
        }
        if identity.keys.is_empty() {
            if Self::all_services_public(settings) {
                result.add_warning(
                    "no verification keys configured; only the public allow-list is served"
                        .into(),
                );
            } else {
                result.add_error(
                    "no verification keys configured but protected routes exist; every \
                     request outside the public allow-list would reject"
                        .into(),
                );
            }
        }
        let mut kids = HashSet::new();
        for key in &identity.keys {
            if !kids.insert(&key.kid) {
                result.add_error(format!("duplicate key id '{}'", key.kid));
            }
            if !key.public_key_pem.contains("BEGIN PUBLIC KEY") {
                result.add_error(format!("key '{}' is not a PEM public key", key.kid));
            }
        }
        if settings.environment == Environment::Production && !identity.cookie_secure {
            result.add_warning("cookie_secure should be true in production".into());
        }
        if settings.environment == Environment::Production
            && settings.cors.allowed_origins.is_empty()
        {
            result.add_recommendation(
                "configure an explicit CORS allow-list for production".into(),
            );
        }
    }

    fn validate_rate_limits(settings: &Settings, result: &mut ValidationResult) {
        let limits = &settings.rate_limit;
        if limits.default.limit == 0 || limits.default.window_secs == 0 {
            result.add_error("default rate limit must have limit and window >= 1".into());
        }
        for rule in &limits.rules {
            if rule.pattern.is_empty() || !rule.pattern.starts_with('/') {
                result.add_error(format!(
                    "rate limit pattern '{}' must start with '/'",
                    rule.pattern
                ));
            }
            if rule.limit == 0 || rule.window_secs == 0 {
                result.add_error(format!(
                    "rate limit rule '{}' must have limit and window >= 1",
                    rule.pattern
                ));
            }
        }
    }

    fn validate_limits(settings: &Settings, result: &mut ValidationResult) {
        if settings.body_limit_bytes == 0 {
            result.add_error("body_limit_bytes must be >= 1".into());
        }
        if settings.body_limit_bytes > 64 * 1024 * 1024 {
            result.add_warning("body_limit_bytes above 64 MiB invites memory pressure".into());
        }
        if settings.request_timeout_secs == 0 {
            result.add_error("request_timeout_secs must be >= 1".into());
        }
    }
}
