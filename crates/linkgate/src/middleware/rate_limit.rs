//! Rate-limit enforcement middleware.
//!
//! Runs after auth so the key can prefer the authenticated identity:
//! `user:<uuid>` for users, `svc:<name>` for mesh peers, `ip:<addr>`
//! otherwise. Every response (admitted or denied) carries the
//! X-RateLimit-Limit / -Remaining / -Reset headers; denials get the 429
//! envelope plus `Retry-After`.

use crate::models::context::RequestContext;
use crate::models::error::GatewayError;
use crate::models::identity::Identity;
use crate::routes::metrics::MetricsCollector;
use crate::services::rate_limiter::{RateLimitDecision, RateLimiter};
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::info;
use std::rc::Rc;
use std::sync::Arc;

/// Admin surface endpoints are exempt: throttling probes turns a busy
/// gateway into a dead one as far as the orchestrator is concerned.
const EXEMPT_PATHS: &[&str] = &["/health", "/live", "/ready", "/metrics", "/"];

fn apply_quota_headers(headers: &mut actix_web::http::header::HeaderMap, d: &RateLimitDecision) {
    let pairs = [
        ("x-ratelimit-limit", d.limit.to_string()),
        ("x-ratelimit-remaining", d.remaining.to_string()),
        ("x-ratelimit-reset", d.reset_epoch_secs.to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

/// Rate limiting middleware over a shared limiter.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
    metrics: MetricsCollector,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>, metrics: MetricsCollector) -> Self {
        Self { limiter, metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: Arc::clone(&self.limiter),
            metrics: self.metrics.clone(),
        })
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
    metrics: MetricsCollector,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = Arc::clone(&self.limiter);
        let metrics = self.metrics.clone();

        Box::pin(async move {
            if EXEMPT_PATHS.contains(&req.path()) {
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            }

            let key = {
                let extensions = req.extensions();
                let client_ip = extensions
                    .get::<RequestContext>()
                    .map(|ctx| ctx.client_ip.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                extensions
                    .get::<Identity>()
                    .map(|identity| identity.rate_limit_key(&client_ip))
                    .unwrap_or_else(|| format!("ip:{}", client_ip))
            };

            let decision = limiter.check(&key, req.path()).await;

            if !decision.allowed {
                metrics.record_rate_limited();
                info!("rate limited {} on {}", key, req.path());
                let error = GatewayError::RateLimited {
                    limit: decision.limit,
                    window_secs: decision.window_secs,
                    retry_after_secs: decision.retry_after_secs,
                };
                let mut response = error.error_response();
                apply_quota_headers(response.headers_mut(), &decision);
                return Ok(req.into_response(response));
            }

            let mut res = service.call(req).await?.map_into_boxed_body();
            apply_quota_headers(res.headers_mut(), &decision);
            Ok(res)
        })
    }
}
