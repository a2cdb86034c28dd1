//! Session lifecycle controller.
//!
//! The control-surface entry point: creates and removes sessions, serves
//! pairing artifacts, sends caller messages, and restores persisted sessions
//! on startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::ClientConnector;
use crate::notify::NotificationClient;
use crate::pipeline::{DispatchResult, MessageAggregator, OutboundDispatcher, OutboundPayload};
use crate::store::SessionStore;

use super::actor::SessionActor;
use super::actor_types::{PAIRING_CHANNEL_CAPACITY, PairingUpdate, SessionContext};
use super::error::{SessionError, validate_session_name};
use super::registry::{SessionRegistry, SessionSummary};

/// Result of restoring persisted sessions on startup.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Sessions brought back up.
    pub restored: Vec<String>,
    /// Sessions already running.
    pub skipped: Vec<String>,
    /// Sessions that could not be restored (name, error message).
    pub errors: Vec<(String, String)>,
}

/// Collaborators the controller wires into every session.
pub struct ControllerDeps {
    pub registry: SessionRegistry,
    pub store: Arc<dyn SessionStore>,
    pub connector: Arc<dyn ClientConnector>,
    pub notifier: Arc<dyn NotificationClient>,
    pub aggregator: MessageAggregator,
    pub pairing_timeout: Duration,
}

#[derive(Clone)]
pub struct SessionController {
    ctx: Arc<SessionContext>,
    dispatcher: OutboundDispatcher,
}

impl SessionController {
    pub fn new(deps: ControllerDeps) -> Self {
        let (pairing_tx, _) = broadcast::channel(PAIRING_CHANNEL_CAPACITY);
        let ctx = SessionContext {
            registry: deps.registry,
            store: deps.store,
            connector: deps.connector,
            notifier: deps.notifier,
            aggregator: deps.aggregator,
            pairing_tx,
            pairing_timeout: deps.pairing_timeout,
        };
        Self {
            ctx: Arc::new(ctx),
            dispatcher: OutboundDispatcher,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.ctx.registry
    }

    /// Create a session and start bringing up its client.
    ///
    /// Returns once the session is registered; pairing and connection happen
    /// asynchronously.
    pub async fn create_session(&self, name: &str) -> Result<(), SessionError> {
        validate_session_name(name)?;

        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .registry
            .register(name, |shutdown_rx| SessionActor::spawn(name, ctx, shutdown_rx))
            .await?;

        info!(session = %name, "Session created");
        Ok(())
    }

    /// Tear a session down and delete its credentials. Idempotent.
    pub async fn remove_session(&self, name: &str) -> Result<(), SessionError> {
        validate_session_name(name)?;

        match self.ctx.registry.get(name) {
            Some(handle) => match handle.remove().await {
                Ok(()) | Err(SessionError::ActorShutdown) => Ok(()),
                Err(e) => Err(e),
            },
            None => {
                // Not running; clear any leftover credentials.
                match self.ctx.store.remove(name).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_in_use() => {
                        warn!(session = %name, error = %e, "Session files in use, not removed");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Latest pairing artifact of a session still waiting to be paired.
    pub async fn pairing_artifact(&self, name: &str) -> Result<String, SessionError> {
        let handle = self
            .ctx
            .registry
            .get(name)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;

        handle
            .pairing_artifact()
            .await
            .map_err(|_| SessionError::NotFound(name.to_string()))?
            .ok_or_else(|| SessionError::PairingUnavailable(name.to_string()))
    }

    /// Subscribe to pairing artifacts of all sessions.
    pub fn subscribe_pairing(&self) -> broadcast::Receiver<PairingUpdate> {
        self.ctx.pairing_tx.subscribe()
    }

    /// Send a caller-supplied message to each target through a session.
    ///
    /// Individual send failures are reported per target, never as an error.
    pub async fn send_message(
        &self,
        session: &str,
        targets: &[String],
        payload: OutboundPayload,
    ) -> Result<Vec<DispatchResult>, SessionError> {
        if targets.is_empty() {
            return Err(SessionError::InvalidRequest(
                "at least one target is required".to_string(),
            ));
        }

        let handle = self
            .ctx
            .registry
            .get(session)
            .ok_or_else(|| SessionError::NotFound(session.to_string()))?;
        let client = handle
            .client()
            .await
            .map_err(|_| SessionError::NotFound(session.to_string()))?
            .ok_or_else(|| SessionError::NotReady(session.to_string()))?;

        Ok(self
            .dispatcher
            .dispatch(client.as_ref(), targets, &payload)
            .await)
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.ctx.registry.list().await
    }

    /// Re-create every session that has a directory on disk.
    pub async fn restore_all(&self) -> Result<RestoreReport, SessionError> {
        let names = self.ctx.store.list().await?;
        let mut report = RestoreReport::default();

        for name in names {
            match self.create_session(&name).await {
                Ok(()) => report.restored.push(name),
                Err(SessionError::Conflict(_)) => report.skipped.push(name),
                Err(e) => {
                    warn!(session = %name, error = %e, "Failed to restore session");
                    report.errors.push((name, e.to_string()));
                }
            }
        }

        info!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Session restore complete"
        );
        Ok(report)
    }

    /// Stop every session, keeping credentials for the next start.
    pub async fn shutdown(&self) {
        self.ctx.registry.shutdown().await;
    }
}
