//! # Linkgate
//!
//! Core library of the Linkgate API gateway: the sole north-south entry
//! point in front of the Link microservice cluster. Built on actix-web and
//! reqwest, it terminates client HTTP, authenticates every request,
//! selects a healthy upstream instance, forwards the request, and enforces
//! back-pressure.
//!
//! ## Request lifecycle
//!
//! ```text
//! ┌────────┐   ┌──────────────────────────────────┐   ┌───────────────┐
//! │ Client │──▶│ CORS → Security → Recovery →     │──▶│ Upstream      │
//! │        │   │ Logger → Correlation → CSRF →    │   │ instances     │
//! │        │◀──│ Auth → Rate Limit → Proxy        │◀──│ (per-instance │
//! └────────┘   └──────────────────────────────────┘   │  breakers)    │
//!                                                     └───────────────┘
//! ```
//!
//! The proxy resolves the target service from the first path segment,
//! consults the load balancer (which consults each instance's circuit
//! breaker), optionally wraps the attempt in the retrier, and streams the
//! response body through without buffering.
//!
//! ## Module organization
//!
//! - [`config`] - Configuration loading and validation
//! - [`logs`] - Logger setup
//! - [`middleware`] - The request-processing chain
//! - [`models`] - Domain types, settings schema, the error envelope
//! - [`routes`] - Health/metrics/inventory endpoints
//! - [`services`] - Registry, load balancer, breaker, retrier, limiter, proxy
//! - [`utils`] - Header hygiene, client-IP derivation, path resolution
//!
//! ## Environment variables
//!
//! - `LINKGATE_CONFIG_PATH`: configuration file path (default `./config.json`)
//! - `LINKGATE_HOST` / `LINKGATE_PORT`: listen address overrides
//! - `RUST_LOG` / `NO_COLOR`: logging controls

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
