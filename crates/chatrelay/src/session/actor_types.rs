//! Session actor types and protocol.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};

use crate::client::{ClientConnector, SessionClient};
use crate::notify::NotificationClient;
use crate::pipeline::MessageAggregator;
use crate::store::SessionStore;

use super::registry::SessionRegistry;
use super::state::SessionState;

// ============================================================================
// Session Command
// ============================================================================

/// Commands that can be sent to a session actor.
pub enum SessionCommand {
    GetState {
        reply: oneshot::Sender<SessionState>,
    },
    GetPairingArtifact {
        reply: oneshot::Sender<Option<String>>,
    },
    /// The client, once the session is connected.
    GetClient {
        reply: oneshot::Sender<Option<Arc<dyn SessionClient>>>,
    },
    /// Tear the session down; replies once teardown is complete.
    Remove { reply: oneshot::Sender<()> },
}

// ============================================================================
// Shared context
// ============================================================================

/// A pairing artifact published to observers.
#[derive(Debug, Clone)]
pub struct PairingUpdate {
    pub session: String,
    pub artifact: String,
}

/// Collaborators every session actor needs.
pub struct SessionContext {
    pub registry: SessionRegistry,
    pub store: Arc<dyn SessionStore>,
    pub connector: Arc<dyn ClientConnector>,
    pub notifier: Arc<dyn NotificationClient>,
    pub aggregator: MessageAggregator,
    pub pairing_tx: broadcast::Sender<PairingUpdate>,
    pub pairing_timeout: Duration,
}

// ============================================================================
// Constants
// ============================================================================

/// Channel capacity for actor commands.
pub const CHANNEL_CAPACITY: usize = 32;

/// Capacity of the pairing broadcast channel.
pub const PAIRING_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on asking a client to close.
pub const CLIENT_CLOSE_WAIT: Duration = Duration::from_secs(2);

/// How long teardown waits for the client to report it has gone away
/// before touching the session directory.
pub const CLIENT_EXIT_WAIT: Duration = Duration::from_secs(5);
