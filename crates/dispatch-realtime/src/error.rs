//! Change feed error types

use thiserror::Error;

/// Change feed errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] dispatch_backend::BackendError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Join rejected: {0}")]
    JoinRejected(String),
}

pub type FeedResult<T> = Result<T, FeedError>;
