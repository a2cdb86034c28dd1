use thiserror::Error;

use crate::store::StorageError;

/// Errors returned by session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already exists: {0}")]
    Conflict(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("no pairing code available for session: {0}")]
    PairingUnavailable(String),

    #[error("session is not connected: {0}")]
    NotReady(String),

    #[error("invalid session name: {0:?}")]
    InvalidName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session actor has shut down")]
    ActorShutdown,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Maximum length of a session name.
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// Session names become directory names, so only a safe subset is allowed.
pub fn validate_session_name(name: &str) -> Result<(), SessionError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SESSION_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidName(name.to_string()))
    }
}
