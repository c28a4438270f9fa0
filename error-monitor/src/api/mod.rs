//! HTTP host.
//!
//! Accepts error reports from producers and exposes the administrator
//! commands over a small JSON API.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
