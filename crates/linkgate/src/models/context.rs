//! Typed per-request context.
//!
//! One `RequestContext` is created by the correlation middleware for every
//! inbound request and stored in the request extensions. Later stages read
//! and update it through the extensions; it is dropped with the request.
//! There are no string-keyed lookups anywhere in the pipeline.

use std::time::Instant;

/// Request-scoped state owned by the handling task.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Opaque id propagated end-to-end; reused from the inbound header when
    /// well-formed, otherwise freshly generated.
    pub correlation_id: String,
    /// True client address derived from trusted forwarding headers.
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub start_time: Instant,
    /// Upstream attempts made so far; written by the proxy.
    pub attempts_made: u32,
    /// Instance that served the final attempt, if any.
    pub selected_instance_id: Option<String>,
}

impl RequestContext {
    pub fn new(
        correlation_id: String,
        client_ip: String,
        method: String,
        path: String,
        query: Option<String>,
    ) -> Self {
        Self {
            correlation_id,
            client_ip,
            method,
            path,
            query,
            start_time: Instant::now(),
            attempts_made: 0,
            selected_instance_id: None,
        }
    }
}
