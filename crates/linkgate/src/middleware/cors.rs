//! CORS handling.
//!
//! Echoes the request `Origin` when it is on the configured allow-list (or
//! unconditionally in development), advertises the gateway's method set,
//! and short-circuits preflight requests with an empty 204.

use crate::models::settings::{CorsSettings, Environment};
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    http::Method,
    Error, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::collections::HashSet;
use std::rc::Rc;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, PATCH";
const ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, X-CSRF-Token, X-Platform, X-Correlation-ID, \
     X-Device-ID, X-Device-Fingerprint";

#[derive(Clone)]
struct CorsConfig {
    allowed_origins: HashSet<String>,
    development: bool,
}

impl CorsConfig {
    fn origin_allowed(&self, origin: &str) -> bool {
        self.development || self.allowed_origins.contains(origin)
    }
}

/// CORS middleware; the outermost stage of the chain.
pub struct Cors {
    config: Rc<CorsConfig>,
}

impl Cors {
    pub fn new(settings: &CorsSettings, environment: Environment) -> Self {
        Self {
            config: Rc::new(CorsConfig {
                allowed_origins: settings.allowed_origins.iter().cloned().collect(),
                development: environment == Environment::Development,
            }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Cors
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = CorsMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CorsMiddleware {
            service: Rc::new(service),
            config: Rc::clone(&self.config),
        })
    }
}

pub struct CorsMiddleware<S> {
    service: Rc<S>,
    config: Rc<CorsConfig>,
}

fn apply_cors_headers(headers: &mut actix_web::http::header::HeaderMap, origin: &HeaderValue) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        origin.clone(),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-credentials"),
        HeaderValue::from_static("true"),
    );
    headers.insert(
        HeaderName::from_static("vary"),
        HeaderValue::from_static("Origin"),
    );
}

impl<S, B> Service<ServiceRequest> for CorsMiddleware<S>
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
        let config = Rc::clone(&self.config);

        Box::pin(async move {
            let origin = req.headers().get("Origin").cloned();
            let origin_allowed = origin
                .as_ref()
                .and_then(|v| v.to_str().ok())
                .map(|o| config.origin_allowed(o))
                .unwrap_or(false);

            let is_preflight = req.method() == Method::OPTIONS
                && req.headers().contains_key("Access-Control-Request-Method");

            if is_preflight {
                let mut response = HttpResponse::NoContent().finish();
                if origin_allowed {
                    if let Some(origin) = &origin {
                        apply_cors_headers(response.headers_mut(), origin);
                    }
                }
                return Ok(req.into_response(response));
            }

            let mut res = service.call(req).await?.map_into_boxed_body();
            if origin_allowed {
                if let Some(origin) = &origin {
                    apply_cors_headers(res.headers_mut(), origin);
                }
            }
            Ok(res)
        })
    }
}
