use crate::store::StoreError;

/// Failures of the presence core, independent of transport.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Gone(String),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl PresenceError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        PresenceError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        PresenceError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        PresenceError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PresenceError::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PresenceError::Validation(message.into())
    }

    pub fn gone(message: impl Into<String>) -> Self {
        PresenceError::Gone(message.into())
    }

    pub(crate) fn is_write_conflict(&self) -> bool {
        matches!(self, PresenceError::Storage(StoreError::WriteConflict))
    }
}
