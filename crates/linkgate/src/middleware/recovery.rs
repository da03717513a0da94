//! Panic recovery.
//!
//! Any panic escaping the downstream middleware or the proxy is caught,
//! logged with a captured backtrace, and converted into the normalized
//! 500 INTERNAL_ERROR envelope instead of tearing down the connection.

use crate::models::error::GatewayError;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use futures_util::FutureExt;
use log::error;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

pub struct Recovery;

impl<S, B> Transform<S, ServiceRequest> for Recovery
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RecoveryMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RecoveryMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct RecoveryMiddleware<S> {
    service: Rc<S>,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<S, B> Service<ServiceRequest> for RecoveryMiddleware<S>
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

        Box::pin(async move {
            // Keep a handle to the request so a response can still be built
            // if the inner call never returns one.
            let (http_req, payload) = req.into_parts();
            let req = ServiceRequest::from_parts(http_req.clone(), payload);

            match AssertUnwindSafe(service.call(req)).catch_unwind().await {
                Ok(result) => result.map(|res| res.map_into_boxed_body()),
                Err(panic) => {
                    error!(
                        "recovered panic while handling {} {}: {}\n{}",
                        http_req.method(),
                        http_req.path(),
                        panic_message(panic.as_ref()),
                        Backtrace::force_capture()
                    );
                    let response = GatewayError::Internal.error_response();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}
