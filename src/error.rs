use thiserror::Error;

use crate::model_client::ModelError;

/// Crate-level error type. Nothing in the core propagates one of these as a
/// process-ending condition; callers degrade or log and continue.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Session already active")]
    AlreadyActive,

    #[error("No active session")]
    NotActive,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Live share error: {0}")]
    LiveShare(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SentinelError>;
