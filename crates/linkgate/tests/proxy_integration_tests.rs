//! End-to-end proxy tests against real TCP upstreams.

use actix_web::{test, web, App};
use linkgate::models::settings::{
    BreakerSettings, CorsSettings, Environment, IdentitySettings, InstanceSettings,
    ListenSettings, RateLimitSettings, RetrySettings, ServiceSettings, Settings, Strategy,
};
use linkgate::routes::metrics::MetricsCollector;
use linkgate::services::proxy::{proxy_entry, ProxyEngine};
use linkgate::services::registry::ServiceRegistry;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal fixed-response HTTP upstream. Echo mode reflects the request
/// head (lowercased) back as the response body so tests can assert on what
/// the gateway actually forwarded.
struct Upstream {
    url: String,
    hits: Arc<AtomicU32>,
}

async fn spawn_upstream(status: u16, body: &'static str, echo: bool) -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let hits_clone = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let hits = Arc::clone(&hits_clone);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();

                // Drain the body if one was announced.
                if let Some(line) = head.lines().find(|l| l.starts_with("content-length:")) {
                    let announced: usize =
                        line.split(':').nth(1).unwrap().trim().parse().unwrap_or(0);
                    let mut have = buf.len() - head_end - 4;
                    while have < announced {
                        let Ok(n) = socket.read(&mut chunk).await else {
                            return;
                        };
                        if n == 0 {
                            break;
                        }
                        have += n;
                    }
                }

                hits.fetch_add(1, Ordering::SeqCst);
                let payload = if echo { head.as_str() } else { body };
                let response = format!(
                    "HTTP/1.1 {} TEST\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\nx-upstream-header: present\r\n\r\n{}",
                    status,
                    payload.len(),
                    payload
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Upstream {
        url: format!("http://{}", addr),
        hits,
    }
}

/// A url that refuses connections: bind a port, then drop the listener.
async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn service(name: &str, urls: &[&str], retry_attempts: u32, breaker: BreakerSettings) -> ServiceSettings {
    ServiceSettings {
        name: name.to_string(),
        strategy: Strategy::RoundRobin,
        instances: urls
            .iter()
            .enumerate()
            .map(|(i, url)| InstanceSettings {
                id: format!("{}-{}", name, i + 1),
                url: url.to_string(),
                weight: 1,
            })
            .collect(),
        circuit_breaker: breaker,
        retry: RetrySettings {
            max_attempts: retry_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        },
        per_attempt_timeout_secs: 5,
    }
}

fn settings(services: Vec<ServiceSettings>, body_limit: usize) -> Settings {
    Settings {
        environment: Environment::Development,
        listen: ListenSettings::default(),
        identity: IdentitySettings {
            issuer: "link-auth".into(),
            cookie_name: "link_access_token".into(),
            cookie_secure: false,
            public_paths: vec![],
            keys: vec![],
        },
        cors: CorsSettings::default(),
        rate_limit: RateLimitSettings::default(),
        body_limit_bytes: body_limit,
        request_timeout_secs: 20,
        services,
    }
}

fn engine_for(settings: &Settings) -> (ProxyEngine, MetricsCollector, Arc<ServiceRegistry>) {
    let registry = Arc::new(ServiceRegistry::from_settings(&settings.services));
    let metrics = MetricsCollector::default();
    let engine = ProxyEngine::new(Arc::clone(&registry), metrics.clone(), settings);
    (engine, metrics, registry)
}

#[actix_web::test]
async fn proxies_to_upstream_and_appends_metadata() {
    let upstream = spawn_upstream(200, "", true).await;
    let settings = settings(
        vec![service("users", &[&upstream.url], 1, BreakerSettings::default())],
        1024 * 1024,
    );
    let (engine, _, _) = engine_for(&settings);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/users/me?full=1")
            .insert_header(("X-Custom", "1"))
            .insert_header(("Connection", "keep-alive"))
            .to_request(),
    )
    .await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("X-Proxy-Service").unwrap(), "users");
    assert_eq!(resp.headers().get("X-Proxy-Instance").unwrap(), "users-1");
    assert_eq!(resp.headers().get("X-Proxy-Attempts").unwrap(), "1");
    assert_eq!(resp.headers().get("x-upstream-header").unwrap(), "present");

    let body = test::read_body(resp).await;
    let head = std::str::from_utf8(&body).unwrap();
    // Service prefix stripped, query preserved.
    assert!(head.starts_with("get /me?full=1 http/1.1"), "head: {}", head);
    // Gateway headers present, hop-by-hop stripped, custom passed through.
    assert!(head.contains("x-gateway-request: true"));
    assert!(head.contains("x-custom: 1"));
    assert!(!head.contains("\nconnection:"));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn svc_suffix_resolves_to_same_service() {
    let upstream = spawn_upstream(200, "", true).await;
    let settings = settings(
        vec![service("users", &[&upstream.url], 1, BreakerSettings::default())],
        1024 * 1024,
    );
    let (engine, _, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/users-svc/profile").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    assert!(std::str::from_utf8(&body)
        .unwrap()
        .starts_with("get /profile http/1.1"));
}

#[actix_web::test]
async fn unknown_service_is_404_without_upstream_call() {
    let upstream = spawn_upstream(200, "ok", false).await;
    let settings = settings(
        vec![service("users", &[&upstream.url], 1, BreakerSettings::default())],
        1024 * 1024,
    );
    let (engine, _, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/nope/anything").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "SERVICE_NOT_FOUND");
    assert_eq!(body["service"], "nope");
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn upstream_4xx_passes_through_verbatim() {
    let upstream = spawn_upstream(404, "missing thing", false).await;
    let settings = settings(
        vec![service("users", &[&upstream.url], 3, BreakerSettings::default())],
        1024 * 1024,
    );
    let (engine, metrics, registry) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/users/gone").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 404);
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"missing thing");
    // 4xx is not a failure: single attempt, breaker untouched.
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.retry_attempts_total.load(Ordering::SeqCst), 0);
    let pool = registry.get("users").unwrap();
    assert_eq!(pool.available_count(), 1);
}

#[actix_web::test]
async fn retry_succeeds_on_second_instance() {
    let failing = spawn_upstream(503, "unavailable", false).await;
    let healthy = spawn_upstream(200, "served by b", false).await;
    let settings = settings(
        vec![service(
            "search",
            &[&failing.url, &healthy.url],
            2,
            BreakerSettings::default(),
        )],
        1024 * 1024,
    );
    let (engine, metrics, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/search/q").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("X-Proxy-Attempts").unwrap(), "2");
    assert_eq!(resp.headers().get("X-Proxy-Instance").unwrap(), "search-2");
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"served by b");
    assert_eq!(metrics.retry_attempts_total.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn post_does_not_retry_server_errors() {
    let failing = spawn_upstream(503, "unavailable", false).await;
    let healthy = spawn_upstream(200, "ok", false).await;
    let settings = settings(
        vec![service(
            "search",
            &[&failing.url, &healthy.url],
            3,
            BreakerSettings::default(),
        )],
        1024 * 1024,
    );
    let (engine, _, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/search/index").to_request(),
    )
    .await;
    // Single attempt hit the failing instance; terminal 502 envelope.
    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "SERVICE_ERROR");
    assert_eq!(body["attempts"], 1);
    assert_eq!(healthy.hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn circuit_trips_after_transport_failures_then_sheds() {
    let dead = refused_url().await;
    let settings = settings(
        vec![service(
            "chat",
            &[&dead],
            1,
            BreakerSettings {
                max_failures: 3,
                failure_ratio: 0.5,
                min_requests: 3,
                reset_timeout_secs: 3600,
            },
        )],
        1024 * 1024,
    );
    let (engine, metrics, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    for _ in 0..3 {
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/chat/rooms").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 502);
    }

    // Breaker now open: shed without dialing.
    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/chat/rooms").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "NO_INSTANCES_AVAILABLE");
    assert_eq!(
        metrics.lb_errors_no_eligible.load(Ordering::SeqCst),
        1
    );
}

#[actix_web::test]
async fn body_at_cap_passes_and_one_byte_over_fails() {
    let upstream = spawn_upstream(200, "stored", false).await;
    let settings = settings(
        vec![service("users", &[&upstream.url], 1, BreakerSettings::default())],
        64,
    );
    let (engine, _, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/users/data")
            .set_payload(vec![b'x'; 64])
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/users/data")
            .set_payload(vec![b'x'; 65])
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 413);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "BODY_READ_ERROR");
}

#[actix_web::test]
async fn get_round_trips_body_bytes() {
    let upstream = spawn_upstream(200, "exact bytes \u{1F680}", false).await;
    let settings = settings(
        vec![service("users", &[&upstream.url], 1, BreakerSettings::default())],
        1024 * 1024,
    );
    let (engine, _, _) = engine_for(&settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(engine))
            .default_service(web::route().to(proxy_entry)),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/users/me").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    assert_eq!(std::str::from_utf8(&body).unwrap(), "exact bytes \u{1F680}");
}
