//! Prometheus-compatible metrics endpoint.
//!
//! Process-wide counters live in lock-free atomics; per-route series are
//! kept in a labeled registry keyed by (service, method, status class,
//! instance). All label sets are bounded: services and instances come from
//! configuration, methods from the HTTP method set, and status codes are
//! bucketed by category.

use crate::services::circuit_breaker::CircuitState;
use crate::services::registry::ServiceRegistry;
use actix_web::{web, HttpResponse, Result};
use ahash::AHashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Buckets HTTP status codes to keep label cardinality bounded.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Label set for one per-route series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub service: String,
    pub method: String,
    pub status_class: &'static str,
    pub instance: String,
}

#[derive(Debug, Default)]
pub struct RouteMetrics {
    pub requests: AtomicU64,
    pub duration_ms_sum: AtomicU64,
}

/// Thread-safe metrics collector shared across workers.
///
/// Safe to clone; clones share the same underlying counters.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    pub requests_total: Arc<AtomicU64>,
    pub requests_success: Arc<AtomicU64>,
    pub requests_error: Arc<AtomicU64>,
    pub response_time_sum_ms: Arc<AtomicU64>,
    pub response_time_bucket_100ms: Arc<AtomicU64>,
    pub response_time_bucket_500ms: Arc<AtomicU64>,
    pub response_time_bucket_1s: Arc<AtomicU64>,
    pub response_time_bucket_5s: Arc<AtomicU64>,
    pub response_time_bucket_inf: Arc<AtomicU64>,
    pub active_connections: Arc<AtomicU64>,
    pub peak_connections: Arc<AtomicU64>,
    pub retry_attempts_total: Arc<AtomicU64>,
    pub lb_errors_no_instances: Arc<AtomicU64>,
    pub lb_errors_no_eligible: Arc<AtomicU64>,
    pub rate_limited_total: Arc<AtomicU64>,
    routes: Arc<RwLock<AHashMap<RouteKey, Arc<RouteMetrics>>>>,
    pub start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_success: Arc::new(AtomicU64::new(0)),
            requests_error: Arc::new(AtomicU64::new(0)),
            response_time_sum_ms: Arc::new(AtomicU64::new(0)),
            response_time_bucket_100ms: Arc::new(AtomicU64::new(0)),
            response_time_bucket_500ms: Arc::new(AtomicU64::new(0)),
            response_time_bucket_1s: Arc::new(AtomicU64::new(0)),
            response_time_bucket_5s: Arc::new(AtomicU64::new(0)),
            response_time_bucket_inf: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            peak_connections: Arc::new(AtomicU64::new(0)),
            retry_attempts_total: Arc::new(AtomicU64::new(0)),
            lb_errors_no_instances: Arc::new(AtomicU64::new(0)),
            lb_errors_no_eligible: Arc::new(AtomicU64::new(0)),
            rate_limited_total: Arc::new(AtomicU64::new(0)),
            routes: Arc::new(RwLock::new(AHashMap::new())),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    /// Records one completed proxied request. Called exactly once per
    /// response, at the proxy's response-completion boundary.
    pub fn record_proxied(
        &self,
        service: &str,
        method: &str,
        status: u16,
        instance: &str,
        duration: Duration,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if status < 500 {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        let ms = duration.as_millis() as u64;
        self.response_time_sum_ms.fetch_add(ms, Ordering::Relaxed);
        if ms <= 100 {
            self.response_time_bucket_100ms.fetch_add(1, Ordering::Relaxed);
        }
        if ms <= 500 {
            self.response_time_bucket_500ms.fetch_add(1, Ordering::Relaxed);
        }
        if ms <= 1000 {
            self.response_time_bucket_1s.fetch_add(1, Ordering::Relaxed);
        }
        if ms <= 5000 {
            self.response_time_bucket_5s.fetch_add(1, Ordering::Relaxed);
        } else {
            self.response_time_bucket_inf.fetch_add(1, Ordering::Relaxed);
        }

        let key = RouteKey {
            service: service.to_string(),
            method: method.to_string(),
            status_class: status_class(status),
            instance: instance.to_string(),
        };
        let entry = {
            let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
            routes.get(&key).cloned()
        };
        let entry = entry.unwrap_or_else(|| {
            let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
            Arc::clone(routes.entry(key).or_default())
        });
        entry.requests.fetch_add(1, Ordering::Relaxed);
        entry.duration_ms_sum.fetch_add(ms, Ordering::Relaxed);
    }

    /// Records extra attempts beyond the first for one request.
    pub fn record_retries(&self, extra_attempts: u64) {
        if extra_attempts > 0 {
            self.retry_attempts_total
                .fetch_add(extra_attempts, Ordering::Relaxed);
        }
    }

    pub fn record_no_instances(&self) {
        self.lb_errors_no_instances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_eligible(&self) {
        self.lb_errors_no_eligible.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Tracks a newly started request and updates the concurrency peak.
    pub fn increment_connections(&self) {
        let current = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        let mut peak = self.peak_connections.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_connections.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(new_peak) => peak = new_peak,
            }
        }
    }

    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Snapshot of one per-route series, for tests and health output.
    pub fn route_requests(&self, key: &RouteKey) -> u64 {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes
            .get(key)
            .map(|m| m.requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Renders everything in Prometheus text exposition format. Gauge
    /// values for instance availability and breaker states are read live
    /// from the registry at scrape time.
    pub fn render(&self, registry: &ServiceRegistry) -> String {
        let total = self.requests_total.load(Ordering::Relaxed);
        let sum_ms = self.response_time_sum_ms.load(Ordering::Relaxed);
        let avg = if total > 0 {
            sum_ms as f64 / total as f64
        } else {
            0.0
        };

        let mut out = String::with_capacity(4096);
        let _ = write!(
            out,
            "# HELP linkgate_requests_total Total proxied HTTP requests\n\
             # TYPE linkgate_requests_total counter\n\
             linkgate_requests_total {}\n\n\
             # HELP linkgate_requests_success_total Requests completed with status < 500\n\
             # TYPE linkgate_requests_success_total counter\n\
             linkgate_requests_success_total {}\n\n\
             # HELP linkgate_requests_error_total Requests completed with status >= 500\n\
             # TYPE linkgate_requests_error_total counter\n\
             linkgate_requests_error_total {}\n\n\
             # HELP linkgate_response_time_avg_ms Mean response time in milliseconds\n\
             # TYPE linkgate_response_time_avg_ms gauge\n\
             linkgate_response_time_avg_ms {:.2}\n\n\
             # HELP linkgate_response_time_bucket Response time histogram\n\
             # TYPE linkgate_response_time_bucket histogram\n\
             linkgate_response_time_bucket{{le=\"100\"}} {}\n\
             linkgate_response_time_bucket{{le=\"500\"}} {}\n\
             linkgate_response_time_bucket{{le=\"1000\"}} {}\n\
             linkgate_response_time_bucket{{le=\"5000\"}} {}\n\
             linkgate_response_time_bucket{{le=\"+Inf\"}} {}\n\n\
             # HELP linkgate_active_connections In-flight client requests\n\
             # TYPE linkgate_active_connections gauge\n\
             linkgate_active_connections {}\n\n\
             # HELP linkgate_peak_connections Peak concurrent client requests\n\
             # TYPE linkgate_peak_connections gauge\n\
             linkgate_peak_connections {}\n\n\
             # HELP linkgate_retry_attempts_total Upstream attempts beyond the first\n\
             # TYPE linkgate_retry_attempts_total counter\n\
             linkgate_retry_attempts_total {}\n\n\
             # HELP linkgate_rate_limited_total Requests denied by the rate limiter\n\
             # TYPE linkgate_rate_limited_total counter\n\
             linkgate_rate_limited_total {}\n\n\
             # HELP linkgate_load_balancer_errors_total Selection failures by reason\n\
             # TYPE linkgate_load_balancer_errors_total counter\n\
             linkgate_load_balancer_errors_total{{reason=\"no_instances\"}} {}\n\
             linkgate_load_balancer_errors_total{{reason=\"no_eligible\"}} {}\n\n\
             # HELP linkgate_uptime_seconds Seconds since gateway start\n\
             # TYPE linkgate_uptime_seconds counter\n\
             linkgate_uptime_seconds {}\n",
            total,
            self.requests_success.load(Ordering::Relaxed),
            self.requests_error.load(Ordering::Relaxed),
            avg,
            self.response_time_bucket_100ms.load(Ordering::Relaxed),
            self.response_time_bucket_500ms.load(Ordering::Relaxed),
            self.response_time_bucket_1s.load(Ordering::Relaxed),
            self.response_time_bucket_5s.load(Ordering::Relaxed),
            self.response_time_bucket_inf.load(Ordering::Relaxed),
            self.active_connections.load(Ordering::Relaxed),
            self.peak_connections.load(Ordering::Relaxed),
            self.retry_attempts_total.load(Ordering::Relaxed),
            self.rate_limited_total.load(Ordering::Relaxed),
            self.lb_errors_no_instances.load(Ordering::Relaxed),
            self.lb_errors_no_eligible.load(Ordering::Relaxed),
            self.start_time.elapsed().as_secs(),
        );

        // Per-route series.
        {
            let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
            if !routes.is_empty() {
                out.push_str(
                    "\n# HELP linkgate_proxy_requests_total Proxied requests by route\n\
                     # TYPE linkgate_proxy_requests_total counter\n",
                );
                let mut keys: Vec<&RouteKey> = routes.keys().collect();
                keys.sort_by(|a, b| {
                    (&a.service, &a.method, a.status_class, &a.instance)
                        .cmp(&(&b.service, &b.method, b.status_class, &b.instance))
                });
                for key in &keys {
                    let m = &routes[*key];
                    let _ = writeln!(
                        out,
                        "linkgate_proxy_requests_total{{service=\"{}\",method=\"{}\",status=\"{}\",instance=\"{}\"}} {}",
                        key.service,
                        key.method,
                        key.status_class,
                        key.instance,
                        m.requests.load(Ordering::Relaxed)
                    );
                }
                out.push_str(
                    "\n# HELP linkgate_proxy_duration_ms_sum Summed request durations by route\n\
                     # TYPE linkgate_proxy_duration_ms_sum counter\n",
                );
                for key in &keys {
                    let m = &routes[*key];
                    let _ = writeln!(
                        out,
                        "linkgate_proxy_duration_ms_sum{{service=\"{}\",method=\"{}\",status=\"{}\",instance=\"{}\"}} {}",
                        key.service,
                        key.method,
                        key.status_class,
                        key.instance,
                        m.duration_ms_sum.load(Ordering::Relaxed)
                    );
                }
            }
        }

        // Live gauges from the registry.
        out.push_str(
            "\n# HELP linkgate_instances_available Eligible instances per service\n\
             # TYPE linkgate_instances_available gauge\n",
        );
        let mut pools: Vec<_> = registry.pools().collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        for pool in &pools {
            let _ = writeln!(
                out,
                "linkgate_instances_available{{service=\"{}\"}} {}",
                pool.name,
                pool.available_count()
            );
        }
        out.push_str(
            "\n# HELP linkgate_circuit_breaker_state Breaker state (0=Closed, 1=Open, 2=HalfOpen)\n\
             # TYPE linkgate_circuit_breaker_state gauge\n",
        );
        for pool in &pools {
            for instance in pool.instances() {
                let state: CircuitState = instance.breaker.current_state();
                let _ = writeln!(
                    out,
                    "linkgate_circuit_breaker_state{{service=\"{}\",instance=\"{}\"}} {}",
                    pool.name,
                    instance.id,
                    state.as_gauge()
                );
            }
        }

        out
    }
}

/// `GET /metrics`: text exposition for Prometheus scrapers.
pub async fn metrics_endpoint(
    metrics: web::Data<MetricsCollector>,
    registry: web::Data<ServiceRegistry>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(metrics.render(&registry)))
}

/// Registers the metrics endpoint.
pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_endpoint));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::{
        BreakerSettings, InstanceSettings, RetrySettings, ServiceSettings, Strategy,
    };

    fn registry() -> ServiceRegistry {
        ServiceRegistry::from_settings(&[ServiceSettings {
            name: "users".into(),
            strategy: Strategy::RoundRobin,
            instances: vec![InstanceSettings {
                id: "users-1".into(),
                url: "http://users-1:8080".into(),
                weight: 1,
            }],
            circuit_breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            per_attempt_timeout_secs: 30,
        }])
    }

    #[test]
    fn status_classes_are_bucketed() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(301), "3xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(503), "5xx");
    }

    #[test]
    fn proxied_requests_update_globals_and_routes() {
        let metrics = MetricsCollector::default();
        metrics.record_proxied("users", "GET", 200, "users-1", Duration::from_millis(12));
        metrics.record_proxied("users", "GET", 502, "users-1", Duration::from_millis(40));

        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.requests_success.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_error.load(Ordering::Relaxed), 1);
        let key = RouteKey {
            service: "users".into(),
            method: "GET".into(),
            status_class: "2xx",
            instance: "users-1".into(),
        };
        assert_eq!(metrics.route_requests(&key), 1);
    }

    #[test]
    fn render_contains_gauges_and_series() {
        let metrics = MetricsCollector::default();
        metrics.record_proxied("users", "GET", 200, "users-1", Duration::from_millis(5));
        metrics.record_retries(1);
        let out = metrics.render(&registry());
        assert!(out.contains("linkgate_requests_total 1"));
        assert!(out.contains("linkgate_retry_attempts_total 1"));
        assert!(out.contains("linkgate_instances_available{service=\"users\"} 1"));
        assert!(out.contains(
            "linkgate_circuit_breaker_state{service=\"users\",instance=\"users-1\"} 0"
        ));
        assert!(out.contains(
            "linkgate_proxy_requests_total{service=\"users\",method=\"GET\",status=\"2xx\",instance=\"users-1\"} 1"
        ));
    }

    #[test]
    fn peak_connections_track_maximum() {
        let metrics = MetricsCollector::default();
        metrics.increment_connections();
        metrics.increment_connections();
        metrics.decrement_connections();
        metrics.increment_connections();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.peak_connections.load(Ordering::Relaxed), 2);
    }
}
