//! Session client error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`SessionClient`](super::SessionClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn bridge '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bridge stdio not available")]
    StdioUnavailable,

    #[error("session client is disconnected")]
    Disconnected,

    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("command rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl ClientError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}
