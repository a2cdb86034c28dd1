//! Session handle for communicating with a session actor.
//!
//! `SessionHandle` is a thin wrapper around an `mpsc::Sender<SessionCommand>`
//! and is cheap to clone.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::client::SessionClient;

use super::actor_types::SessionCommand;
use super::error::SessionError;
use super::state::SessionState;

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    name: String,
    /// Distinguishes this actor from a later one registered under the same name.
    instance: String,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::Sender<SessionCommand>, name: String, instance: String) -> Self {
        Self { tx, name, instance }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        self.request(|reply| SessionCommand::GetState { reply }).await
    }

    pub async fn pairing_artifact(&self) -> Result<Option<String>, SessionError> {
        self.request(|reply| SessionCommand::GetPairingArtifact { reply })
            .await
    }

    /// The session's client, if the session is connected.
    pub async fn client(&self) -> Result<Option<Arc<dyn SessionClient>>, SessionError> {
        self.request(|reply| SessionCommand::GetClient { reply }).await
    }

    /// Tear the session down and wait for it to finish.
    pub async fn remove(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Remove { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)
    }
}
