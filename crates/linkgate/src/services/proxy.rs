//! The proxy engine: request lifecycle from service resolution to response
//! streaming.
//!
//! Per request: resolve the target service from the first path segment,
//! buffer the body up to the configured cap (mandatory for retry
//! correctness), then run attempts through the retrier. Each attempt selects
//! an instance (load balancer consults the circuit breakers), forwards the
//! request with hygiene-filtered headers plus identity and gateway headers,
//! and records the outcome with the instance's breaker. Successful response
//! bodies are streamed straight through, never buffered.

use crate::models::context::RequestContext;
use crate::models::error::GatewayError;
use crate::models::identity::Identity;
use crate::models::settings::Settings;
use crate::routes::metrics::MetricsCollector;
use crate::services::registry::{SelectError, ServiceRegistry};
use crate::services::retry::{method_is_idempotent, Retrier, RetryClass};
use crate::utils::headers as header_util;
use crate::utils::path as path_util;

use actix_web::{
    error::ResponseError,
    http::{Method as ActixMethod, StatusCode},
    web, Error as ActixError, HttpMessage, HttpRequest, HttpResponse,
};
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{
    header::HeaderMap as UpstreamHeaderMap, header::HeaderValue as UpstreamHeaderValue, Client,
    Method as UpstreamMethod,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Identity-propagation headers are always rewritten by the gateway; any
/// client-supplied copies are dropped first so they cannot be spoofed.
const IDENTITY_HEADERS: &[&str] = &[
    "x-user-id",
    "x-user-email",
    "x-user-name",
    "x-user-roles",
    "x-user-permissions",
    "x-service-name",
    "x-gateway-request",
];

/// Classified outcome of one failed upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptFailure {
    /// Connect/read/write failure against the selected instance.
    Transport,
    /// Per-attempt (or remaining overall) deadline elapsed.
    Timeout,
    /// Upstream answered with a 5xx.
    UpstreamServer(u16),
    /// Selection failed before any instance was contacted.
    NoInstances(SelectError),
}

impl RetryClass for AttemptFailure {
    fn is_retriable(&self) -> bool {
        // Selection failures are terminal: retrying cannot conjure an
        // eligible instance inside one request's deadline.
        !matches!(self, AttemptFailure::NoInstances(_))
    }
}

struct UpstreamOutcome {
    response: reqwest::Response,
    instance_id: String,
}

/// High-performance proxy handler shared across workers.
///
/// Holds the pooled upstream client, the service registry, and the metrics
/// collector as explicit dependencies; safe to clone.
#[derive(Clone)]
pub struct ProxyEngine {
    client: Client,
    registry: Arc<ServiceRegistry>,
    metrics: MetricsCollector,
    body_limit: usize,
    request_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        metrics: MetricsCollector,
        settings: &Settings,
    ) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("failed to create upstream HTTP client");

        Self {
            client,
            registry,
            metrics,
            body_limit: settings.body_limit_bytes,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Proxies one request end to end.
    pub async fn handle(
        &self,
        req: HttpRequest,
        payload: web::Payload,
    ) -> Result<HttpResponse, ActixError> {
        self.metrics.increment_connections();
        let result = self.handle_inner(&req, payload).await;
        self.metrics.decrement_connections();
        result
    }

    async fn handle_inner(
        &self,
        req: &HttpRequest,
        payload: web::Payload,
    ) -> Result<HttpResponse, ActixError> {
        let start = Instant::now();

        let (service_name, rest) = path_util::split_service_path(req.path()).ok_or_else(|| {
            GatewayError::ServiceNotFound {
                service: req.path().trim_matches('/').to_string(),
            }
        })?;
        let service_name = service_name.to_string();

        let pool = self
            .registry
            .get(&service_name)
            .ok_or_else(|| GatewayError::ServiceNotFound {
                service: service_name.clone(),
            })?;

        // A declared size over the cap is rejected before any bytes are
        // read; chunked bodies are caught while buffering.
        if let Some(declared) = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if declared > self.body_limit {
                warn!(
                    "[{}] declared body of {} bytes exceeds cap",
                    correlation_id_of(req),
                    declared
                );
                return Err(GatewayError::BodyTooLarge {
                    limit: self.body_limit,
                }
                .into());
            }
        }

        // Full buffering up front: a retried attempt must replay the exact
        // same bytes.
        let body = collect_payload(payload, self.body_limit).await?;

        let identity = req
            .extensions()
            .get::<Identity>()
            .cloned()
            .unwrap_or(Identity::Anonymous);
        let ctx = req.extensions().get::<RequestContext>().cloned();
        let correlation_id = ctx
            .as_ref()
            .map(|c| c.correlation_id.clone())
            .unwrap_or_default();

        let upstream_headers = self.build_upstream_headers(req, &identity, ctx.as_ref());
        let method = to_upstream_method(req.method());
        let query = match req.query_string() {
            "" => None,
            q => Some(q.to_string()),
        };

        let deadline = start + self.request_timeout;
        let retries_allowed = method_is_idempotent(req.method())
            || req.headers().contains_key("idempotency-key");
        let retrier = Retrier::new(pool.retry.clone());

        let rest = Arc::new(rest);
        let query = Arc::new(query);
        let (result, attempts) = retrier
            .run(deadline, retries_allowed, |attempt| {
                let pool = Arc::clone(&pool);
                let client = self.client.clone();
                let method = method.clone();
                let headers = upstream_headers.clone();
                let body = body.clone();
                let rest = Arc::clone(&rest);
                let query = Arc::clone(&query);
                let correlation_id = correlation_id.clone();
                async move {
                    let selection = pool.select().map_err(AttemptFailure::NoInstances)?;
                    let instance = selection.instance;
                    let url =
                        path_util::build_target_url(&instance.url, &rest, query.as_deref());

                    if attempt > 0 {
                        warn!(
                            "[{}] retry attempt {} -> {}",
                            correlation_id,
                            attempt + 1,
                            url
                        );
                    } else {
                        debug!("[{}] forwarding to {}", correlation_id, url);
                    }

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(AttemptFailure::Timeout);
                    }
                    let per_attempt = pool.per_attempt_timeout.min(remaining);

                    instance.begin_request();
                    let outcome = timeout(
                        per_attempt,
                        client
                            .request(method, url.as_str())
                            .headers(headers)
                            .body(body)
                            .send(),
                    )
                    .await;
                    instance.end_request();

                    match outcome {
                        Ok(Ok(response)) if response.status().as_u16() < 500 => {
                            instance.record_success();
                            Ok(UpstreamOutcome {
                                response,
                                instance_id: instance.id.clone(),
                            })
                        }
                        Ok(Ok(response)) => {
                            let status = response.status().as_u16();
                            warn!("[{}] upstream {} returned {}", correlation_id, url, status);
                            instance.record_failure();
                            Err(AttemptFailure::UpstreamServer(status))
                        }
                        Ok(Err(e)) => {
                            warn!("[{}] transport error to {}: {}", correlation_id, url, e);
                            instance.record_failure();
                            Err(AttemptFailure::Transport)
                        }
                        Err(_) => {
                            warn!(
                                "[{}] upstream {} timed out after {:?}",
                                correlation_id, url, per_attempt
                            );
                            instance.record_failure();
                            Err(AttemptFailure::Timeout)
                        }
                    }
                }
            })
            .await;

        self.metrics.record_retries(attempts.saturating_sub(1) as u64);

        match result {
            Ok(outcome) => {
                if let Some(mut ctx) = ctx {
                    ctx.attempts_made = attempts;
                    ctx.selected_instance_id = Some(outcome.instance_id.clone());
                    req.extensions_mut().insert(ctx);
                }
                let status = StatusCode::from_u16(outcome.response.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY);

                self.metrics.record_proxied(
                    &service_name,
                    req.method().as_str(),
                    status.as_u16(),
                    &outcome.instance_id,
                    start.elapsed(),
                );

                let mut builder = HttpResponse::build(status);
                header_util::apply_response_headers(&mut builder, outcome.response.headers());
                builder.insert_header(("X-Proxy-Service", service_name.as_str()));
                builder.insert_header(("X-Proxy-Instance", outcome.instance_id.as_str()));
                builder.insert_header(("X-Proxy-Attempts", attempts.to_string()));

                // Stream the body through; dropping the client connection
                // drops this stream and with it the upstream request.
                Ok(builder.streaming(outcome.response.bytes_stream()))
            }
            Err(failure) => {
                let error = match failure {
                    AttemptFailure::NoInstances(SelectError::EmptyPool) => {
                        self.metrics.record_no_instances();
                        GatewayError::NoInstancesAvailable {
                            service: service_name.clone(),
                        }
                    }
                    AttemptFailure::NoInstances(SelectError::NoEligibleInstances) => {
                        self.metrics.record_no_eligible();
                        GatewayError::NoInstancesAvailable {
                            service: service_name.clone(),
                        }
                    }
                    AttemptFailure::Timeout => GatewayError::ServiceTimeout {
                        service: service_name.clone(),
                        attempts,
                    },
                    AttemptFailure::Transport | AttemptFailure::UpstreamServer(_) => {
                        GatewayError::ServiceError {
                            service: service_name.clone(),
                            attempts,
                        }
                    }
                };
                self.metrics.record_proxied(
                    &service_name,
                    req.method().as_str(),
                    error.status_code().as_u16(),
                    "-",
                    start.elapsed(),
                );
                Err(error.into())
            }
        }
    }

    /// Request headers for the upstream call: the client's headers minus
    /// hop-by-hop and spoofable identity headers, plus gateway forwarding
    /// and identity-propagation headers.
    fn build_upstream_headers(
        &self,
        req: &HttpRequest,
        identity: &Identity,
        ctx: Option<&RequestContext>,
    ) -> UpstreamHeaderMap {
        let mut headers = header_util::filter_request_headers(req.headers());

        for name in IDENTITY_HEADERS {
            headers.remove(*name);
        }

        insert_header(&mut headers, "x-gateway-request", "true");
        if let Some(ctx) = ctx {
            insert_header(&mut headers, "x-forwarded-for", &ctx.client_ip);
            insert_header(&mut headers, "x-correlation-id", &ctx.correlation_id);
        }
        let conn = req.connection_info();
        insert_header(&mut headers, "x-forwarded-proto", conn.scheme());
        insert_header(&mut headers, "x-forwarded-host", conn.host());

        match identity {
            Identity::User {
                user_id,
                email,
                username,
                roles,
                permissions,
                platform,
                ..
            } => {
                headers.remove("x-platform");
                insert_header(&mut headers, "x-user-id", &user_id.to_string());
                insert_header(&mut headers, "x-user-email", email);
                insert_header(&mut headers, "x-user-name", username);
                insert_header(&mut headers, "x-platform", platform.as_str());
                insert_header(&mut headers, "x-user-roles", &join_sorted(roles));
                insert_header(&mut headers, "x-user-permissions", &join_sorted(permissions));
            }
            Identity::Service { service_name, .. } => {
                insert_header(&mut headers, "x-service-name", service_name);
            }
            Identity::Anonymous => {}
        }

        headers
    }
}

fn correlation_id_of(req: &HttpRequest) -> String {
    req.extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.correlation_id.clone())
        .unwrap_or_default()
}

fn join_sorted(values: &std::collections::HashSet<String>) -> String {
    let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

fn insert_header(headers: &mut UpstreamHeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = UpstreamHeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn to_upstream_method(method: &ActixMethod) -> UpstreamMethod {
    match method {
        &ActixMethod::GET => UpstreamMethod::GET,
        &ActixMethod::POST => UpstreamMethod::POST,
        &ActixMethod::PUT => UpstreamMethod::PUT,
        &ActixMethod::DELETE => UpstreamMethod::DELETE,
        &ActixMethod::HEAD => UpstreamMethod::HEAD,
        &ActixMethod::OPTIONS => UpstreamMethod::OPTIONS,
        &ActixMethod::PATCH => UpstreamMethod::PATCH,
        &ActixMethod::TRACE => UpstreamMethod::TRACE,
        _ => UpstreamMethod::GET,
    }
}

/// Buffers the request body up to `limit` bytes. Exactly `limit` bytes
/// succeed; one byte more is rejected.
async fn collect_payload(
    mut payload: web::Payload,
    limit: usize,
) -> Result<web::Bytes, GatewayError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|_| GatewayError::BodyRead)?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::BodyTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Catch-all entry point: everything not claimed by the admin surface is
/// proxied.
pub async fn proxy_entry(
    req: HttpRequest,
    payload: web::Payload,
    engine: web::Data<ProxyEngine>,
) -> Result<HttpResponse, ActixError> {
    engine.handle(req, payload).await
}
