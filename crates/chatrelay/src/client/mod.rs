//! Session client capability.
//!
//! A [`SessionClient`] is the exclusively owned connection of one session to
//! the messaging network. Clients are created by a [`ClientConnector`], which
//! also hands back the ordered stream of [`ClientEvent`]s for that session.

mod bridge;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use chatrelay_protocol::{ConnectionStatus, InboundMessageData, MediaPayload};

pub use bridge::{BridgeClient, BridgeConnector};
pub use error::ClientError;

/// Capacity of the per-session event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Platform message id, when the bridge reports one.
    pub message_id: Option<String>,
}

/// Events produced by a session client, in arrival order.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A fresh pairing artifact (QR payload) to show to the user.
    PairingArtifact(String),
    /// Connection status change.
    Status(ConnectionStatus),
    /// Inbound message from a chat.
    Inbound(Box<InboundMessageData>),
    /// The client went away (process exit, fatal error, or requested close).
    Closed { reason: String },
}

/// Parameters for bringing up a session client.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub session: String,
    /// Durable directory the client keeps its credentials in.
    pub session_dir: PathBuf,
}

/// A connected client plus its event stream.
pub struct ClientConnection {
    pub client: Arc<dyn SessionClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Operations a session can perform against the messaging network.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, ClientError>;

    async fn send_image(
        &self,
        to: &str,
        media: MediaPayload,
        caption: Option<&str>,
    ) -> Result<SendReceipt, ClientError>;

    async fn send_document(
        &self,
        to: &str,
        media: MediaPayload,
        filename: Option<&str>,
    ) -> Result<SendReceipt, ClientError>;

    /// Toggle the typing indicator. Best-effort.
    async fn set_typing(&self, to: &str, on: bool) -> Result<(), ClientError>;

    /// Close the connection. Credentials on disk are left alone.
    async fn close(&self) -> Result<(), ClientError>;
}

/// Factory for session clients.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> Result<ClientConnection, ClientError>;
}
