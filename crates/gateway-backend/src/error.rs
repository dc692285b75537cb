use std::time::Duration;

use gateway_core::GatewayError;

/// Transport-level failures talking to a backend server.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{url} answered HTTP {status}")]
    Status { status: u16, url: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("connection closed by backend")]
    Closed,
}

impl From<BackendError> for GatewayError {
    fn from(e: BackendError) -> Self {
        GatewayError::backend(e.to_string())
    }
}
