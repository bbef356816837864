//! Engine error taxonomy shared by matchmaking and match lifecycle

/// Errors returned to the transport layer for player-initiated actions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(why: impl Into<String>) -> Self {
        Self::InvalidState(why.into())
    }

    pub fn internal(why: impl Into<String>) -> Self {
        Self::Internal(why.into())
    }

    /// Stable tag sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("serialization failed: {err}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
