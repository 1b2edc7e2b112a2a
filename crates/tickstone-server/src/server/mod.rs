//! Server-side components of `tickstone-server`.
//!
//! - [`config`] - CLI/environment configuration and validation.
//! - [`error`] - oracle errors as HTTP responses.
//! - [`routes`] - the axum router.
//! - [`telemetry`] - logging setup.

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;
