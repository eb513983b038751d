//! Call session error types

use dispatch_backend::BackendError;
use dispatch_core::{CallId, CallStatus};
use thiserror::Error;

/// Errors surfaced to the user by a call session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Call {0} has no usable location")]
    MissingLocation(CallId),

    #[error("Call {id} is already {status}")]
    CallClosed { id: CallId, status: CallStatus },

    #[error("Session for call {0} is closed")]
    SessionClosed(CallId),
}

impl SessionError {
    /// The user has to configure the app or sign in again
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::Backend(e) if e.requires_reauthentication())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
