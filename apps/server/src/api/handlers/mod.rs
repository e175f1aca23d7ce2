//! Request handlers for API endpoints

pub mod metrics;
