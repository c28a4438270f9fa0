//! error-monitor library crate.
//!
//! Batches error reports from chat hosts and delivers rate-limited HTML
//! summaries over SMTP.

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod render;
pub mod transport;

pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use monitor::{ExceptionMonitor, MessageEvent};
