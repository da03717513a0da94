//! HTTP endpoint definitions for the gateway's own surface.
//!
//! Everything not claimed here is handled by the catch-all proxy entry
//! (`crate::services::proxy::proxy_entry`).
//!
//! - [`health`] - `/health`, `/live`, `/ready`, and the `/` inventory
//! - [`metrics`] - `/metrics` Prometheus exposition

pub mod health;
pub mod metrics;
