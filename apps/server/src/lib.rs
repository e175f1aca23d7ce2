//! pgpq exporter
//!
//! Serves queue length and oldest task age per namespace on `/metrics`, for
//! scraping by Prometheus.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
