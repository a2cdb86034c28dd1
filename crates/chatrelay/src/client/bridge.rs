//! Subprocess bridge client.
//!
//! Each session runs one bridge process speaking `chatrelay-protocol` over
//! stdio. Commands that expect an acknowledgement are correlated by
//! `request_id`; everything else the bridge emits is forwarded as a
//! [`ClientEvent`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use chatrelay_protocol::{BridgeCommand, BridgeEvent, ENV_SESSION, ENV_SESSION_DIR, MediaPayload};

use super::{
    ClientConnection, ClientConnector, ClientError, ClientEvent, ConnectOptions,
    EVENT_CHANNEL_CAPACITY, SendReceipt, SessionClient,
};
use crate::config::BridgeConfig;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// How long a bridge gets to exit after a `close` command.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type PendingAcks = Arc<DashMap<String, oneshot::Sender<Result<SendReceipt, ClientError>>>>;

// ============================================================================
// Connector
// ============================================================================

/// Spawns one bridge subprocess per session.
pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    fn spawn_child(&self, options: &ConnectOptions) -> Result<Child, ClientError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env(ENV_SESSION, &options.session)
            .env(ENV_SESSION_DIR, &options.session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // On Linux, set PR_SET_PDEATHSIG to ensure child dies when parent dies
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn().map_err(|source| ClientError::Spawn {
            command: self.config.command.clone(),
            source,
        })
    }
}

#[async_trait]
impl ClientConnector for BridgeConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<ClientConnection, ClientError> {
        info!(
            session = %options.session,
            command = %self.config.command,
            "Spawning session bridge"
        );

        let child = self.spawn_child(&options)?;
        let (client, events) = attach(
            options.session,
            child,
            Duration::from_secs(self.config.command_timeout_seconds),
        )?;

        Ok(ClientConnection {
            client: Arc::new(client),
            events,
        })
    }
}

/// Start the stdio pump for a spawned bridge and hand back its client.
fn attach(
    session: String,
    mut child: Child,
    command_timeout: Duration,
) -> Result<(BridgeClient, mpsc::Receiver<ClientEvent>), ClientError> {
    let stdin = child.stdin.take().ok_or(ClientError::StdioUnavailable)?;
    let stdout = child.stdout.take().ok_or(ClientError::StdioUnavailable)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (evt_tx, evt_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (kill_tx, kill_rx) = watch::channel(false);
    let pending: PendingAcks = Arc::new(DashMap::new());

    let io = BridgeIo {
        session: session.clone(),
        pending: pending.clone(),
        evt_tx,
    };
    tokio::spawn(io.run(child, stdin, stdout, cmd_rx, kill_rx));

    let client = BridgeClient {
        session,
        cmd_tx,
        kill_tx,
        pending,
        command_timeout,
    };
    Ok((client, evt_rx))
}

// ============================================================================
// Client
// ============================================================================

/// Handle to a running bridge subprocess.
pub struct BridgeClient {
    session: String,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    /// Stops the pump without going through the command queue.
    kill_tx: watch::Sender<bool>,
    pending: PendingAcks,
    command_timeout: Duration,
}

impl BridgeClient {
    /// Send a command and wait for its `command_ok` / `command_error`.
    async fn request(
        &self,
        request_id: String,
        command: BridgeCommand,
    ) -> Result<SendReceipt, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if self.cmd_tx.send(command).await.is_err() {
            self.pending.remove(&request_id);
            return Err(ClientError::Disconnected);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.pending.remove(&request_id);
                warn!(
                    session = %self.session,
                    request_id = %request_id,
                    "Bridge did not acknowledge command"
                );
                Err(ClientError::Timeout(self.command_timeout))
            }
        }
    }
}

fn next_request_id() -> String {
    ulid::Ulid::new().to_string()
}

#[async_trait]
impl SessionClient for BridgeClient {
    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, ClientError> {
        let request_id = next_request_id();
        let command = BridgeCommand::SendText {
            request_id: request_id.clone(),
            to: to.to_string(),
            text: text.to_string(),
        };
        self.request(request_id, command).await
    }

    async fn send_image(
        &self,
        to: &str,
        media: MediaPayload,
        caption: Option<&str>,
    ) -> Result<SendReceipt, ClientError> {
        let request_id = next_request_id();
        let command = BridgeCommand::SendImage {
            request_id: request_id.clone(),
            to: to.to_string(),
            media,
            caption: caption.map(str::to_string),
        };
        self.request(request_id, command).await
    }

    async fn send_document(
        &self,
        to: &str,
        media: MediaPayload,
        filename: Option<&str>,
    ) -> Result<SendReceipt, ClientError> {
        let request_id = next_request_id();
        let command = BridgeCommand::SendDocument {
            request_id: request_id.clone(),
            to: to.to_string(),
            media,
            filename: filename.map(str::to_string),
        };
        self.request(request_id, command).await
    }

    async fn set_typing(&self, to: &str, on: bool) -> Result<(), ClientError> {
        self.cmd_tx
            .send(BridgeCommand::SetTyping {
                to: to.to_string(),
                on,
            })
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Never waits on the command queue. When it is full the bridge is
    /// killed instead of closed gracefully.
    async fn close(&self) -> Result<(), ClientError> {
        match self.cmd_tx.try_send(BridgeCommand::Close) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.session, "Bridge command queue full, killing bridge");
                self.kill_tx.send_replace(true);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::Disconnected),
        }
    }
}

// ============================================================================
// Stdio pump
// ============================================================================

/// Moves lines between the bridge's stdio and chatrelay's channels.
struct BridgeIo {
    session: String,
    pending: PendingAcks,
    evt_tx: mpsc::Sender<ClientEvent>,
}

impl BridgeIo {
    async fn run(
        self,
        mut child: Child,
        mut stdin: ChildStdin,
        stdout: ChildStdout,
        mut cmd_rx: mpsc::Receiver<BridgeCommand>,
        mut kill_rx: watch::Receiver<bool>,
    ) {
        let mut stdout_reader = BufReader::new(stdout).lines();
        let session = self.session.clone();

        let reason = loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(reason) = self.handle_line(&line).await {
                                break reason;
                            }
                        }
                        Ok(None) => {
                            debug!(session = %session, "Bridge stdout closed");
                            break "bridge closed stdout".to_string();
                        }
                        Err(e) => {
                            error!(session = %session, error = %e, "Error reading bridge stdout");
                            break format!("stdout read error: {e}");
                        }
                    }
                }

                cmd = cmd_rx.recv() => {
                    let Some(command) = cmd else {
                        debug!(session = %session, "Command channel closed");
                        break "client dropped".to_string();
                    };
                    let is_close = matches!(command, BridgeCommand::Close);
                    if let Err(e) = write_command(&mut stdin, &command).await {
                        error!(session = %session, error = %e, "Failed to write to bridge stdin");
                        self.fail_request(&command, ClientError::Disconnected);
                        break format!("stdin write error: {e}");
                    }
                    if is_close {
                        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                            Ok(_) => debug!(session = %session, "Bridge exited after close"),
                            Err(_) => warn!(session = %session, "Bridge ignored close, killing"),
                        }
                        break "closed".to_string();
                    }
                }

                changed = kill_rx.changed() => {
                    if changed.is_err() {
                        debug!(session = %session, "Client handle dropped");
                        break "client dropped".to_string();
                    }
                    if *kill_rx.borrow_and_update() {
                        warn!(session = %session, "Killing bridge");
                        break "killed".to_string();
                    }
                }

                status = child.wait() => {
                    match status {
                        Ok(status) => {
                            info!(session = %session, status = %status, "Bridge exited");
                            break format!("bridge exited: {status}");
                        }
                        Err(e) => {
                            error!(session = %session, error = %e, "Error waiting for bridge");
                            break format!("wait error: {e}");
                        }
                    }
                }
            }
        };

        let _ = child.kill().await;
        let _ = child.wait().await;

        // Anyone still waiting on an ack gets a definite answer.
        let outstanding: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for request_id in outstanding {
            if let Some((_, tx)) = self.pending.remove(&request_id) {
                let _ = tx.send(Err(ClientError::Disconnected));
            }
        }

        let _ = self.evt_tx.send(ClientEvent::Closed { reason }).await;
    }

    /// Handle one stdout line. Returns `Some(reason)` when the bridge is done.
    async fn handle_line(&self, line: &str) -> Option<String> {
        let event = match serde_json::from_str::<BridgeEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    session = %self.session,
                    line = %line,
                    error = %e,
                    "Failed to parse bridge event"
                );
                return None;
            }
        };

        let forward = match event {
            BridgeEvent::Ready { version, .. } => {
                info!(session = %self.session, version = %version, "Bridge ready");
                None
            }
            BridgeEvent::PairingCode { data } => Some(ClientEvent::PairingArtifact(data)),
            BridgeEvent::Status { status } => Some(ClientEvent::Status(status)),
            BridgeEvent::MessageReceived(data) => Some(ClientEvent::Inbound(data)),
            BridgeEvent::CommandOk {
                request_id,
                message_id,
            } => {
                self.resolve(&request_id, Ok(SendReceipt { message_id }));
                None
            }
            BridgeEvent::CommandError {
                request_id,
                code,
                message,
            } => {
                self.resolve(&request_id, Err(ClientError::rejected(code, message)));
                None
            }
            BridgeEvent::Error {
                code,
                message,
                fatal,
            } => {
                if fatal {
                    error!(session = %self.session, code = %code, message = %message, "Fatal bridge error");
                } else {
                    warn!(session = %self.session, code = %code, message = %message, "Bridge error");
                }
                None
            }
            BridgeEvent::Shutdown { reason } => {
                info!(session = %self.session, reason = %reason, "Bridge shutting down");
                return Some(reason);
            }
        };

        if let Some(event) = forward
            && self.evt_tx.send(event).await.is_err()
        {
            debug!(session = %self.session, "Event channel closed");
            return Some("event channel closed".to_string());
        }
        None
    }

    fn resolve(&self, request_id: &str, result: Result<SendReceipt, ClientError>) {
        match self.pending.remove(request_id) {
            Some((_, tx)) => {
                let _ = tx.send(result);
            }
            None => debug!(
                session = %self.session,
                request_id = %request_id,
                "Acknowledgement for unknown or expired request"
            ),
        }
    }

    fn fail_request(&self, command: &BridgeCommand, error: ClientError) {
        let request_id = match command {
            BridgeCommand::SendText { request_id, .. }
            | BridgeCommand::SendImage { request_id, .. }
            | BridgeCommand::SendDocument { request_id, .. } => request_id,
            BridgeCommand::SetTyping { .. } | BridgeCommand::Close => return,
        };
        if let Some((_, tx)) = self.pending.remove(request_id) {
            let _ = tx.send(Err(error));
        }
    }
}

async fn write_command(stdin: &mut ChildStdin, command: &BridgeCommand) -> std::io::Result<()> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}
