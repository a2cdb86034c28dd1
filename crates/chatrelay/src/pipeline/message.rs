use std::fmt;

use chrono::{DateTime, Utc};

use chatrelay_protocol::InboundMessageData;

/// Content kind of an inbound message, as far as the pipeline cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    /// Base64 image payload that must be uploaded before forwarding.
    Image,
    Other,
}

/// A message received by a session, immutable once buffered.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub session: String,
    pub chat_id: String,
    pub sender: String,
    pub kind: ContentKind,
    /// Text, or base64 media for images. `None` when the platform sent nothing.
    pub payload: Option<String>,
    pub mime_type: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build from a bridge event received by `session`.
    ///
    /// Only `image` messages with an `image/*` mime type are treated as images.
    pub fn from_bridge(session: &str, data: InboundMessageData) -> Self {
        let is_image_mime = data
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"));
        let kind = match data.kind.as_str() {
            "image" if is_image_mime => ContentKind::Image,
            "chat" | "text" => ContentKind::Text,
            _ => ContentKind::Other,
        };

        Self {
            message_id: data.message_id,
            session: session.to_string(),
            chat_id: data.chat_id,
            sender: data.from,
            kind,
            payload: data.body,
            mime_type: data.mime_type,
            received_at: data.timestamp.unwrap_or_else(Utc::now),
        }
    }

    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(&self.session, &self.chat_id)
    }
}

/// Identifies one conversation: a remote chat within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub session: String,
    pub chat_id: String,
}

impl ConversationKey {
    pub fn new(session: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.chat_id)
    }
}
