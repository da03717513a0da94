//! Cross-cutting middleware for the gateway.
//!
//! The chain runs in a fixed order, outermost first:
//!
//! ```text
//! CORS → Security Headers → Panic Recovery → Request Logger
//!      → Correlation → CSRF → Auth → Rate Limit → Proxy
//! ```
//!
//! actix-web applies `wrap()` calls innermost-first, so the server binary
//! registers these in reverse; the chain order above is the contract.
//!
//! - [`auth`] - Bearer-token verification and mesh identity acceptance
//! - [`correlation`] - Correlation IDs and the typed request context
//! - [`cors`] - Origin allow-list and preflight handling
//! - [`csrf`] - Token-bound CSRF for state-changing requests
//! - [`rate_limit`] - Sliding-window admission control
//! - [`recovery`] - Panic-to-500 normalization
//! - [`security`] - Response hardening headers

pub mod auth;
pub mod correlation;
pub mod cors;
pub mod csrf;
pub mod rate_limit;
pub mod recovery;
pub mod security;
