//! Linkgate API Gateway Server
//!
//! Binary entry point: loads and validates configuration, wires the
//! middleware chain and the proxy engine, and runs the actix-web server
//! with graceful shutdown.

use linkgate::config::settings::load_settings;
use linkgate::config::validation::ConfigValidator;
use linkgate::logs::logger::configure_logger;
use linkgate::middleware::auth::{Auth, AuthConfig};
use linkgate::middleware::correlation::Correlation;
use linkgate::middleware::cors::Cors;
use linkgate::middleware::csrf::Csrf;
use linkgate::middleware::rate_limit::RateLimit;
use linkgate::middleware::recovery::Recovery;
use linkgate::middleware::security::security_headers;
use linkgate::models::settings::Settings;
use linkgate::routes::{health, metrics};
use linkgate::services::proxy::{proxy_entry, ProxyEngine};
use linkgate::services::rate_limiter::{spawn_sweeper, RateLimiter};
use linkgate::services::registry::ServiceRegistry;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const CSRF_COOKIE: &str = "link_csrf";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings: Settings = load_settings().expect("failed to load settings");

    info!(
        "starting linkgate v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        settings.environment
    );

    let validation = ConfigValidator::validate_comprehensive(&settings);
    if !validation.is_valid() {
        error!("configuration validation failed:");
        for err in &validation.errors {
            error!("  - {}", err);
        }
        std::process::exit(1);
    }
    validation.log();
    info!(
        "configuration validated with {} warnings",
        validation.warnings.len()
    );

    let registry = Arc::new(ServiceRegistry::from_settings(&settings.services));
    info!("registered {} services", registry.len());

    let metrics_collector = metrics::MetricsCollector::default();
    let engine = ProxyEngine::new(Arc::clone(&registry), metrics_collector.clone(), &settings);

    let limiter = Arc::new(RateLimiter::from_settings(&settings.rate_limit));
    spawn_sweeper(Arc::clone(&limiter), Duration::from_secs(60));

    let auth_config = AuthConfig::from_settings(&settings.identity, false)
        .expect("failed to parse identity verification keys");

    let host = std::env::var("LINKGATE_HOST").unwrap_or_else(|_| settings.listen.host.clone());
    let port = std::env::var("LINKGATE_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(settings.listen.port);

    info!("listening on {}:{}", host, port);

    let environment = settings.environment;
    let cors_settings = settings.cors.clone();
    let identity_settings = settings.identity.clone();

    // wrap() is applied innermost-first, so registration runs the chain
    // backwards: the last wrap (CORS) is the outermost stage.
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(metrics_collector.clone()))
            .app_data(web::Data::from(Arc::clone(&registry)))
            .app_data(web::Data::new(engine.clone()))
            .wrap(RateLimit::new(
                Arc::clone(&limiter),
                metrics_collector.clone(),
            ))
            .wrap(Auth::new(auth_config.clone()))
            .wrap(Csrf::new(
                identity_settings.cookie_name.clone(),
                CSRF_COOKIE.to_string(),
                identity_settings.public_paths.clone(),
            ))
            .wrap(Correlation)
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
            ))
            .wrap(Recovery)
            .wrap(security_headers(environment))
            .wrap(Cors::new(&cors_settings, environment))
            .configure(health::configure_health)
            .configure(metrics::configure_metrics)
            .default_service(web::route().to(proxy_entry))
    })
    .bind((host.as_str(), port))?
    .disable_signals()
    .run();

    let handle = server.handle();

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped"),
                Err(e) => error!("server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, draining connections");
            handle.stop(true).await;
            info!("shutdown complete");
        }
    }

    Ok(())
}
