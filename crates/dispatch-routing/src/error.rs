//! Routing error types

use std::time::Duration;
use thiserror::Error;

/// Routing errors
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Rate limited by routing provider (waited {waited:?})")]
    RateLimited { waited: Duration },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed provider response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RoutingError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type RoutingResult<T> = Result<T, RoutingError>;
