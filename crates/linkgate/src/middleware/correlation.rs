//! Correlation IDs and request-context construction.
//!
//! Runs before every stage that logs or forwards: reuses a well-formed
//! inbound `X-Correlation-ID`, otherwise generates a fresh UUIDv4 (128-bit
//! random, fixed hyphenated text form), derives the client IP, and seeds
//! the typed [`RequestContext`] in the request extensions. The id is echoed
//! back on the response.

use crate::models::context::RequestContext;
use crate::utils::ip::derive_client_ip;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Inbound ids are reused only when they look like ids: bounded length,
/// restricted alphabet. Anything else gets replaced.
fn is_well_formed(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn correlation_id_for(req: &ServiceRequest) -> String {
    req.headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_well_formed(id))
        .map(|id| id.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Correlation middleware; wrap outside auth and rate limiting so their log
/// records carry the id.
pub struct Correlation;

impl<S, B> Transform<S, ServiceRequest> for Correlation
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = CorrelationMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CorrelationMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct CorrelationMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for CorrelationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let correlation_id = correlation_id_for(&req);
            let peer = req.peer_addr().map(|addr| addr.to_string());
            let client_ip = derive_client_ip(req.headers(), peer.as_deref());

            let query = match req.query_string() {
                "" => None,
                q => Some(q.to_string()),
            };
            let ctx = RequestContext::new(
                correlation_id.clone(),
                client_ip,
                req.method().to_string(),
                req.path().to_string(),
                query,
            );
            req.extensions_mut().insert(ctx);

            let mut res = service.call(req).await?;
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                res.headers_mut()
                    .insert(HeaderName::from_static(CORRELATION_HEADER), value);
            }
            Ok(res)
        })
    }
}
