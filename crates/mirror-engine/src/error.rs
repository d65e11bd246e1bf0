use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors produced while mirroring a single request.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request path: {0}")]
    InvalidPath(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MirrorError {
    /// Status code this error is reported with: origin connection failures
    /// are gateway errors, local filesystem failures are server errors.
    pub fn status(&self) -> StatusCode {
        match self {
            MirrorError::Http(_) => StatusCode::BAD_GATEWAY,
            MirrorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MirrorError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            MirrorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
