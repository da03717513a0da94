//! Token-bound CSRF protection for state-changing requests.
//!
//! Unsafe methods must present the CSRF token in the `X-CSRF-Token` header
//! matching the value bound to the session cookie. Safe methods (GET, HEAD,
//! OPTIONS, TRACE) bypass, as do allow-listed public paths and requests
//! authenticated purely by `Authorization` header (no cookie session means
//! nothing to bind a token to).

use crate::models::error::GatewayError;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    http::Method,
    Error,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use rand::RngCore;
use std::rc::Rc;

pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Mints a new CSRF token: 32 cryptographically random bytes, URL-safe
/// base64. The auth surface sets this as a cookie at login.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

#[derive(Clone)]
struct CsrfConfig {
    /// Session cookie whose presence makes CSRF checks mandatory.
    session_cookie: String,
    /// Cookie carrying the token the header must match.
    csrf_cookie: String,
    public_paths: Vec<String>,
}

/// CSRF middleware for the middleware chain.
pub struct Csrf {
    config: Rc<CsrfConfig>,
}

impl Csrf {
    pub fn new(session_cookie: String, csrf_cookie: String, public_paths: Vec<String>) -> Self {
        Self {
            config: Rc::new(CsrfConfig {
                session_cookie,
                csrf_cookie,
                public_paths,
            }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Csrf
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = CsrfMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CsrfMiddleware {
            service: Rc::new(service),
            config: Rc::clone(&self.config),
        })
    }
}

pub struct CsrfMiddleware<S> {
    service: Rc<S>,
    config: Rc<CsrfConfig>,
}

impl<S, B> Service<ServiceRequest> for CsrfMiddleware<S>
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
            let exempt = is_safe_method(req.method())
                || config
                    .public_paths
                    .iter()
                    .any(|prefix| req.path().starts_with(prefix))
                || req.headers().contains_key("Authorization")
                || req.cookie(&config.session_cookie).is_none();

            if !exempt {
                let cookie_token = req
                    .cookie(&config.csrf_cookie)
                    .map(|c| c.value().to_string());
                let header_token = req
                    .headers()
                    .get(CSRF_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string());

                let matches = match (&cookie_token, &header_token) {
                    (Some(cookie), Some(header)) => !cookie.is_empty() && cookie == header,
                    _ => false,
                };
                if !matches {
                    warn!(
                        "csrf token mismatch on {} {}",
                        req.method(),
                        req.path()
                    );
                    let response = GatewayError::CsrfMismatch.error_response();
                    return Ok(req.into_response(response));
                }
            }

            let res = service.call(req).await?;
            Ok(res.map_into_boxed_body())
        })
    }
}
