//! Error types for the dispatch system

use thiserror::Error;

/// Core error type for the dispatch system
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid position: latitude={lat}, longitude={lng}")]
    InvalidPosition { lat: f64, lng: f64 },

    #[error("Malformed position: {0:?}")]
    MalformedPosition(String),

    #[error("Unknown call status: {0}")]
    UnknownStatus(String),
}

impl CoreError {
    pub fn invalid_position(lat: f64, lng: f64) -> Self {
        Self::InvalidPosition { lat, lng }
    }

    pub fn malformed_position(raw: impl Into<String>) -> Self {
        Self::MalformedPosition(raw.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
