//! Console error types

use dispatch_backend::BackendError;
use dispatch_routing::RoutingError;
use dispatch_tracker::SessionError;
use thiserror::Error;

/// Console errors
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

impl ConsoleError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// The user needs to run `login` again
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            Self::Backend(e) => e.requires_reauthentication(),
            Self::Session(e) => e.requires_reauthentication(),
            _ => false,
        }
    }
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;
