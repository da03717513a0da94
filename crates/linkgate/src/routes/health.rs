//! Health, readiness, and inventory endpoints.

use crate::services::circuit_breaker::CircuitState;
use crate::services::registry::ServiceRegistry;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

fn state_name(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

/// `GET /health`: aggregate gateway health with a per-service breakdown.
///
/// Healthy (200) while every service has at least one instance eligible for
/// selection; otherwise degraded (503) so orchestrators stop routing here.
pub async fn health_check(registry: web::Data<ServiceRegistry>) -> Result<HttpResponse> {
    let mut services = serde_json::Map::new();
    let mut degraded = false;

    let mut pools: Vec<_> = registry.pools().collect();
    pools.sort_by(|a, b| a.name.cmp(&b.name));
    for pool in pools {
        let instances = pool.instances();
        let healthy = instances.iter().filter(|i| i.is_healthy()).count();
        let available = pool.available_count();
        if available == 0 {
            degraded = true;
        }

        let breakers: serde_json::Map<String, serde_json::Value> = instances
            .iter()
            .map(|i| {
                (
                    i.id.clone(),
                    json!(state_name(i.breaker.current_state())),
                )
            })
            .collect();

        services.insert(
            pool.name.clone(),
            json!({
                "total_instances": instances.len(),
                "healthy_instances": healthy,
                "available_instances": available,
                "strategy": pool.strategy,
                "breakers": breakers,
            }),
        );
    }

    let body = json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "services": services,
    });

    if degraded {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

/// Liveness probe: the process is up and serving.
pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Readiness probe: configuration is loaded and the registry is non-empty.
pub async fn readiness_check(registry: web::Data<ServiceRegistry>) -> Result<HttpResponse> {
    if registry.is_empty() {
        return Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "not_ready",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })));
    }
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// `GET /`: the service inventory.
pub async fn inventory(registry: web::Data<ServiceRegistry>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "gateway": "linkgate",
        "version": env!("CARGO_PKG_VERSION"),
        "services": registry.service_names(),
    })))
}

/// Registers the admin surface.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/live", web::get().to(liveness_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/", web::get().to(inventory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::{
        BreakerSettings, InstanceSettings, RetrySettings, ServiceSettings, Strategy,
    };
    use actix_web::{test, App};

    fn registry() -> ServiceRegistry {
        ServiceRegistry::from_settings(&[ServiceSettings {
            name: "users".into(),
            strategy: Strategy::RoundRobin,
            instances: vec![InstanceSettings {
                id: "users-1".into(),
                url: "http://users-1:8080".into(),
                weight: 1,
            }],
            circuit_breaker: BreakerSettings {
                max_failures: 1,
                failure_ratio: 0.5,
                min_requests: 1,
                reset_timeout_secs: 3600,
            },
            retry: RetrySettings::default(),
            per_attempt_timeout_secs: 30,
        }])
    }

    #[actix_web::test]
    async fn healthy_registry_reports_200_with_breakdown() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry()))
                .configure(configure_health),
        )
        .await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["users"]["total_instances"], 1);
        assert_eq!(body["services"]["users"]["healthy_instances"], 1);
        assert_eq!(body["services"]["users"]["breakers"]["users-1"], "closed");
    }

    #[actix_web::test]
    async fn tripped_service_degrades_health() {
        let registry = registry();
        registry.get("users").unwrap().instances()[0].record_failure();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .configure(configure_health),
        )
        .await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["services"]["users"]["breakers"]["users-1"], "open");
    }

    #[actix_web::test]
    async fn inventory_lists_services() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry()))
                .configure(configure_health),
        )
        .await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["services"][0], "users");
    }

    #[actix_web::test]
    async fn probes_answer() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry()))
                .configure(configure_health),
        )
        .await;
        let live =
            test::call_service(&app, test::TestRequest::get().uri("/live").to_request()).await;
        assert_eq!(live.status(), 200);
        let ready =
            test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
        assert_eq!(ready.status(), 200);
    }
}
