//! Error types for the exporter

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Queue error: {0}")]
    Queue(#[from] pgpq::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Queue(pgpq::Error::InvalidNamespace(_)) => StatusCode::BAD_REQUEST,
            Error::Queue(_) | Error::Metrics(_) => {
                tracing::error!(error = %self, "Failed to serve request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            [("Content-Type", "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
