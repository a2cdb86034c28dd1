//! Bridge Protocol types for communication between chatrelay and session bridges.
//!
//! A *bridge* is the process that actually speaks the messaging protocol for
//! one session (handshake, encryption, media upload). chatrelay spawns one
//! bridge per session and talks to it through this protocol.
//!
//! # Protocol Overview
//!
//! The protocol is bidirectional with JSON Lines (newline-delimited JSON) over stdio:
//!
//! - **Commands** (chatrelay → bridge): send text/image/document, typing, close
//! - **Events** (bridge → chatrelay): pairing codes, status changes, inbound messages,
//!   command acknowledgements
//!
//! Commands that expect an acknowledgement carry a `request_id`; the bridge
//! answers with [`BridgeEvent::CommandOk`] or [`BridgeEvent::CommandError`]
//! carrying the same id.
//!
//! # Example: Minimal Bridge
//!
//! ```ignore
//! use chatrelay_protocol::{BridgeCommand, BridgeEvent};
//!
//! // Read commands from stdin
//! let line = read_line_from_stdin();
//! let command: BridgeCommand = serde_json::from_str(&line)?;
//!
//! // Send events to stdout
//! let event = BridgeEvent::PairingCode {
//!     data: "2@AbCdEf...".to_string(),
//! };
//! println!("{}", serde_json::to_string(&event)?);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable carrying the session name passed to a bridge.
pub const ENV_SESSION: &str = "CHATRELAY_SESSION";

/// Environment variable carrying the session's durable directory.
pub const ENV_SESSION_DIR: &str = "CHATRELAY_SESSION_DIR";

// ============================================================================
// Commands (chatrelay → Bridge)
// ============================================================================

/// Commands sent from chatrelay to a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Send a text message.
    SendText {
        request_id: String,
        to: String,
        text: String,
    },

    /// Send an image, optionally with a caption.
    SendImage {
        request_id: String,
        to: String,
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },

    /// Send a file as a document.
    SendDocument {
        request_id: String,
        to: String,
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Start or stop the typing indicator in a chat.
    SetTyping { to: String, on: bool },

    /// Close the session connection and exit.
    Close,
}

/// Media payload for image and document commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MediaPayload {
    /// Fetch media from URL.
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Base64-encoded media data.
    Base64 {
        data: String,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl MediaPayload {
    /// Media referenced by URL with no declared mime type.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            mime_type: None,
        }
    }
}

// ============================================================================
// Events (Bridge → chatrelay)
// ============================================================================

/// Events sent from a bridge to chatrelay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Bridge process is up and ready to receive commands.
    Ready { session: String, version: String },

    /// A new pairing code (QR payload) was issued.
    PairingCode { data: String },

    /// Connection status changed.
    Status { status: ConnectionStatus },

    /// Incoming message from a chat.
    MessageReceived(Box<InboundMessageData>),

    /// Command completed successfully.
    CommandOk {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Command failed.
    CommandError {
        request_id: String,
        code: String,
        message: String,
    },

    /// Bridge-level error (not tied to a specific command).
    Error {
        code: String,
        message: String,
        /// Whether this error is fatal (bridge will shut down).
        #[serde(default)]
        fatal: bool,
    },

    /// Bridge is shutting down.
    Shutdown { reason: String },
}

/// Connection status reported by a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Credentials accepted; the session is logged in.
    Authenticated,
    /// The session is logged in and chats are loaded.
    Active,
    /// Waiting for the pairing code to be scanned.
    Pairing,
    /// The session was logged out from the phone or the server.
    LoggedOut,
    /// Any status this protocol version does not name.
    #[serde(other)]
    Unknown,
}

impl ConnectionStatus {
    /// Whether this status means the remote session is authenticated and usable.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticated | Self::Active)
    }
}

/// Data for an incoming message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessageData {
    pub message_id: String,
    /// Chat the message belongs to (the remote party for direct chats).
    pub chat_id: String,
    /// Sender identifier.
    pub from: String,
    /// Platform content type (e.g. "chat", "image", "document").
    pub kind: String,
    /// Text, caption, or base64 media depending on `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Whether the chat is a group or broadcast list.
    #[serde(default)]
    pub is_group: bool,
    /// Timestamp when the message was sent (from the platform).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Well-known error codes for CommandError and Error events.
pub mod error_codes {
    /// Recipient does not exist on the platform.
    pub const RECIPIENT_NOT_FOUND: &str = "recipient_not_found";
    /// Media could not be fetched or decoded.
    pub const INVALID_MEDIA: &str = "invalid_media";
    /// Session is not logged in.
    pub const NOT_CONNECTED: &str = "not_connected";
    /// Platform API error.
    pub const PLATFORM_ERROR: &str = "platform_error";
    /// Malformed command from chatrelay.
    pub const INVALID_REQUEST: &str = "invalid_request";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = BridgeCommand::SendImage {
            request_id: "req_001".to_string(),
            to: "5511988887777@c.us".to_string(),
            media: MediaPayload::url("https://cdn.example.com/a.jpg"),
            caption: None,
        };

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""type":"send_image""#));
        assert!(json.contains(r#""source":"url""#));
        assert!(!json.contains("caption"));
    }

    #[test]
    fn test_close_is_bare_tag() {
        let json = serde_json::to_string(&BridgeCommand::Close).unwrap();
        assert_eq!(json, r#"{"type":"close"}"#);
    }

    #[test]
    fn test_status_event_parsing() {
        let event: BridgeEvent =
            serde_json::from_str(r#"{"type":"status","status":"logged_out"}"#).unwrap();
        match event {
            BridgeEvent::Status { status } => assert_eq!(status, ConnectionStatus::LoggedOut),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unrecognized_status_maps_to_unknown() {
        let event: BridgeEvent =
            serde_json::from_str(r#"{"type":"status","status":"browser_closed"}"#).unwrap();
        match event {
            BridgeEvent::Status { status } => {
                assert_eq!(status, ConnectionStatus::Unknown);
                assert!(!status.is_connected());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_connected_statuses() {
        assert!(ConnectionStatus::Authenticated.is_connected());
        assert!(ConnectionStatus::Active.is_connected());
        assert!(!ConnectionStatus::Pairing.is_connected());
        assert!(!ConnectionStatus::LoggedOut.is_connected());
    }

    #[test]
    fn test_message_received_defaults() {
        let line = r#"{"type":"message_received","message_id":"m1","chat_id":"5511@c.us","from":"5511@c.us","kind":"chat","body":"oi"}"#;
        let event: BridgeEvent = serde_json::from_str(line).unwrap();
        match event {
            BridgeEvent::MessageReceived(data) => {
                assert_eq!(data.body.as_deref(), Some("oi"));
                assert!(!data.is_group);
                assert!(data.mime_type.is_none());
                assert!(data.timestamp.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }
}
