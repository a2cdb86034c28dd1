//! Session actor.
//!
//! One actor task per session. It owns the session's client, lifecycle state,
//! cached pairing artifact and pairing timeout, and consumes the client's
//! events in order. All lifecycle transitions and teardown happen here.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatrelay_protocol::ConnectionStatus;

use crate::client::{ClientEvent, ConnectOptions, SessionClient};
use crate::notify::SessionNotification;
use crate::pipeline::InboundMessage;

use super::actor_types::{
    CHANNEL_CAPACITY, CLIENT_CLOSE_WAIT, CLIENT_EXIT_WAIT, PairingUpdate, SessionCommand,
    SessionContext,
};
use super::handle::SessionHandle;
use super::pairing::PairingTimeoutGuard;
use super::state::SessionState;

/// What to do with the session directory when the actor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Credentials {
    Delete,
    Keep,
}

pub struct SessionActor {
    name: String,
    instance: String,
    state: SessionState,
    client: Option<Arc<dyn SessionClient>>,
    events: Option<mpsc::Receiver<ClientEvent>>,
    pairing_artifact: Option<String>,
    pairing_guard: PairingTimeoutGuard,
    ctx: Arc<SessionContext>,
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionActor {
    /// Spawn an actor for `name`. The client is connected from inside the task.
    pub fn spawn(
        name: &str,
        ctx: Arc<SessionContext>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let instance = ulid::Ulid::new().to_string();

        let actor = Self {
            name: name.to_string(),
            instance: instance.clone(),
            state: SessionState::Initializing,
            client: None,
            events: None,
            pairing_artifact: None,
            pairing_guard: PairingTimeoutGuard::new(ctx.pairing_timeout),
            ctx,
            command_rx: rx,
            shutdown_rx,
        };

        let task = tokio::spawn(actor.run());
        (SessionHandle::new(tx, name.to_string(), instance), task)
    }

    async fn run(mut self) {
        debug!(session = %self.name, "Session actor started");

        if let Err(reason) = self.connect().await {
            error!(session = %self.name, error = %reason, "Failed to bring up session client");
            self.teardown(SessionState::Closed, Credentials::Keep).await;
            self.reject_pending_commands();
            return;
        }

        self.event_loop().await;
        debug!(session = %self.name, state = %self.state, "Session actor stopped");
    }

    async fn connect(&mut self) -> Result<(), String> {
        let session_dir = self
            .ctx
            .store
            .prepare(&self.name)
            .await
            .map_err(|e| e.to_string())?;

        let connection = self
            .ctx
            .connector
            .connect(ConnectOptions {
                session: self.name.clone(),
                session_dir,
            })
            .await
            .map_err(|e| e.to_string())?;

        self.client = Some(connection.client);
        self.events = Some(connection.events);
        info!(session = %self.name, "Session client started");
        Ok(())
    }

    async fn event_loop(&mut self) {
        loop {
            let expired = self.pairing_guard.expired();

            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        debug!(session = %self.name, "Session actor received shutdown signal");
                        self.teardown(SessionState::Closed, Credentials::Keep).await;
                        break;
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            debug!(session = %self.name, "All handles dropped, shutting down");
                            self.teardown(SessionState::Closed, Credentials::Keep).await;
                            break;
                        }
                    }
                }

                event = next_event(&mut self.events) => {
                    if self.handle_event(event).await {
                        break;
                    }
                }

                _ = expired => {
                    if self.pairing_guard.fire() {
                        info!(session = %self.name, "Pairing timed out");
                        self.teardown(SessionState::Expired, Credentials::Delete).await;
                        break;
                    }
                }
            }
        }

        self.reject_pending_commands();
    }

    /// Returns `true` when the actor should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::GetState { reply } => {
                let _ = reply.send(self.state);
            }
            SessionCommand::GetPairingArtifact { reply } => {
                let _ = reply.send(self.pairing_artifact.clone());
            }
            SessionCommand::GetClient { reply } => {
                let client = match self.state {
                    SessionState::Connected => self.client.clone(),
                    _ => None,
                };
                let _ = reply.send(client);
            }
            SessionCommand::Remove { reply } => {
                info!(session = %self.name, "Removing session");
                self.teardown(SessionState::Closed, Credentials::Delete).await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    /// Returns `true` when the actor should stop.
    async fn handle_event(&mut self, event: Option<ClientEvent>) -> bool {
        let Some(event) = event else {
            warn!(session = %self.name, "Client event stream ended");
            self.teardown(SessionState::Closed, Credentials::Keep).await;
            return true;
        };

        match event {
            ClientEvent::PairingArtifact(artifact) => self.on_pairing_artifact(artifact),
            ClientEvent::Status(status) => return self.on_status(status).await,
            ClientEvent::Inbound(data) => {
                if data.is_group {
                    debug!(
                        session = %self.name,
                        chat = %data.chat_id,
                        "Ignoring group message"
                    );
                } else {
                    self.ctx
                        .aggregator
                        .push(InboundMessage::from_bridge(&self.name, *data));
                }
            }
            ClientEvent::Closed { reason } => {
                warn!(session = %self.name, reason = %reason, "Session client closed unexpectedly");
                self.events = None;
                self.teardown(SessionState::Closed, Credentials::Keep).await;
                return true;
            }
        }
        false
    }

    fn on_pairing_artifact(&mut self, artifact: String) {
        if self.state == SessionState::Connected {
            debug!(session = %self.name, "Ignoring pairing code while connected");
            return;
        }

        self.state = SessionState::AwaitingPairing;
        self.pairing_guard.arm();
        self.pairing_artifact = Some(artifact.clone());
        // No receivers is fine.
        let _ = self.ctx.pairing_tx.send(PairingUpdate {
            session: self.name.clone(),
            artifact,
        });
        debug!(session = %self.name, "Pairing code issued");
    }

    async fn on_status(&mut self, status: ConnectionStatus) -> bool {
        match status {
            s if s.is_connected() => {
                if self.state == SessionState::Connected {
                    return false;
                }
                self.pairing_guard.cancel();
                self.pairing_artifact = None;
                self.state = SessionState::Connected;
                info!(session = %self.name, "Session connected");
                self.notify(SessionNotification::Connected);
                false
            }
            ConnectionStatus::LoggedOut => {
                if self.state == SessionState::Connected {
                    info!(session = %self.name, "Session logged out");
                    self.notify(SessionNotification::Disconnected);
                    self.teardown(SessionState::Disconnected, Credentials::Delete)
                        .await;
                } else {
                    info!(session = %self.name, state = %self.state, "Session logged out before pairing");
                    self.teardown(SessionState::Closed, Credentials::Delete).await;
                }
                true
            }
            other => {
                debug!(session = %self.name, status = ?other, "Session status");
                false
            }
        }
    }

    /// Fire-and-forget notification; failures are only logged.
    fn notify(&self, event: SessionNotification) {
        let notifier = Arc::clone(&self.ctx.notifier);
        let session = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(event, &session).await {
                warn!(session = %session, event = %event, error = %e, "Notification failed");
            }
        });
    }

    /// Release everything the session holds.
    ///
    /// Safe to call more than once.
    async fn teardown(&mut self, final_state: SessionState, credentials: Credentials) {
        self.pairing_guard.cancel();
        self.pairing_artifact = None;

        if let Some(client) = self.client.take() {
            match tokio::time::timeout(CLIENT_CLOSE_WAIT, client.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session = %self.name, error = %e, "Error closing session client")
                }
                Err(_) => warn!(session = %self.name, "Session client close timed out"),
            }
            // Our handle goes first; a client that ignored close is stopped on drop.
            drop(client);
            self.wait_for_client_exit().await;
        }
        self.events = None;

        self.ctx.aggregator.purge_session(&self.name);

        if credentials == Credentials::Delete {
            match self.ctx.store.remove(&self.name).await {
                Ok(()) => debug!(session = %self.name, "Session directory removed"),
                Err(e) if e.is_in_use() => {
                    warn!(session = %self.name, error = %e, "Session files in use, not removed")
                }
                Err(e) => warn!(session = %self.name, error = %e, "Failed to remove session files"),
            }
        }

        self.ctx.registry.remove(&self.name, &self.instance);
        self.state = final_state;
        info!(session = %self.name, state = %final_state, "Session torn down");
    }

    /// Drain client events until it reports closure, bounded by [`CLIENT_EXIT_WAIT`].
    async fn wait_for_client_exit(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        let drained = tokio::time::timeout(CLIENT_EXIT_WAIT, async {
            while let Some(event) = events.recv().await {
                if matches!(event, ClientEvent::Closed { .. }) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(session = %self.name, "Session client did not exit in time");
        }
    }

    /// Answer commands that raced with teardown so no caller hangs.
    fn reject_pending_commands(&mut self) {
        self.command_rx.close();
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                SessionCommand::GetState { reply } => {
                    let _ = reply.send(self.state);
                }
                SessionCommand::GetPairingArtifact { reply } => {
                    let _ = reply.send(None);
                }
                SessionCommand::GetClient { reply } => {
                    let _ = reply.send(None);
                }
                SessionCommand::Remove { reply } => {
                    let _ = reply.send(());
                }
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ClientEvent>>) -> Option<ClientEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
