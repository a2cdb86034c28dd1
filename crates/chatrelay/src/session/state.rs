use std::fmt;

use serde::Serialize;

/// Lifecycle state of a session.
///
/// ```text
/// Initializing ──artifact──▶ AwaitingPairing ──auth──▶ Connected
///      │                          │                       │
///      └──────auth (restored)─────┼──────────────▶        │ logout
///                                 │ timer                 ▼
///                                 ▼                  Disconnected
///                              Expired                    │
///                                 └──────▶ Closed ◀───────┘
/// ```
///
/// Administrative removal moves any state to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingPairing,
    Connected,
    Disconnected,
    Expired,
    Closed,
}

impl SessionState {
    /// Whether the session has been torn down or is being torn down.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Expired | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Expired => "expired",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}
