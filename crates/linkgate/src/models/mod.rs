//! Data models and domain types for the linkgate gateway.
//!
//! - [`context`] - Typed per-request state
//! - [`error`] - Gateway error taxonomy and the JSON error envelope
//! - [`identity`] - Principals, token claims, RBAC guards, mesh identities
//! - [`settings`] - Configuration schema

pub mod context;
pub mod error;
pub mod identity;
pub mod settings;
