//! Metrics endpoint handler
//!
//! Reads queue length and oldest task age for every exported namespace and
//! renders them in the Prometheus text format.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::metrics::CONTENT_TYPE;
use crate::state::AppState;

/// Handler for /metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> crate::Result<impl IntoResponse> {
    let buffer = state
        .metrics
        .scrape(state.stats.as_ref(), Utc::now())
        .await?;

    Ok((StatusCode::OK, [("Content-Type", CONTENT_TYPE)], buffer))
}
