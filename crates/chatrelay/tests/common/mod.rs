//! Common test utilities.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::sync::mpsc;

use chatrelay::client::{
    ClientConnection, ClientConnector, ClientError, ClientEvent, ConnectOptions,
    EVENT_CHANNEL_CAPACITY, SendReceipt, SessionClient,
};
use chatrelay::notify::{NotificationClient, NotifyError, SessionNotification};
use chatrelay::pipeline::{DownstreamRequestBuilder, MessageAggregator, ReplyPipeline};
use chatrelay::server::{self, AppState};
use chatrelay::session::{ControllerDeps, SessionController, SessionRegistry, SessionState};
use chatrelay::store::{SessionStore, StorageResult};
use chatrelay_protocol::{InboundMessageData, MediaPayload};

// ============================================================================
// Fake client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        to: String,
        text: String,
    },
    Image {
        to: String,
        media: MediaPayload,
        caption: Option<String>,
    },
    Document {
        to: String,
        media: MediaPayload,
        filename: Option<String>,
    },
}

/// Client that records every operation and fails sends to chosen targets.
pub struct FakeClient {
    events: mpsc::Sender<ClientEvent>,
    fail_targets: HashSet<String>,
    send_delay: Duration,
    hang_on_close: bool,
    sent: Mutex<Vec<Sent>>,
    typing: Mutex<Vec<(String, bool)>>,
    closed: AtomicBool,
}

impl FakeClient {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn typing(&self) -> Vec<(String, bool)> {
        self.typing.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn record(&self, to: &str, sent: Sent) -> Result<SendReceipt, ClientError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if self.fail_targets.contains(to) {
            return Err(ClientError::rejected(
                "recipient_not_found",
                format!("no such recipient: {to}"),
            ));
        }
        let mut log = self.sent.lock().unwrap();
        log.push(sent);
        Ok(SendReceipt {
            message_id: Some(format!("msg-{}", log.len())),
        })
    }
}

#[async_trait]
impl SessionClient for FakeClient {
    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, ClientError> {
        self.record(
            to,
            Sent::Text {
                to: to.to_string(),
                text: text.to_string(),
            },
        )
        .await
    }

    async fn send_image(
        &self,
        to: &str,
        media: MediaPayload,
        caption: Option<&str>,
    ) -> Result<SendReceipt, ClientError> {
        self.record(
            to,
            Sent::Image {
                to: to.to_string(),
                media,
                caption: caption.map(str::to_string),
            },
        )
        .await
    }

    async fn send_document(
        &self,
        to: &str,
        media: MediaPayload,
        filename: Option<&str>,
    ) -> Result<SendReceipt, ClientError> {
        self.record(
            to,
            Sent::Document {
                to: to.to_string(),
                media,
                filename: filename.map(str::to_string),
            },
        )
        .await
    }

    async fn set_typing(&self, to: &str, on: bool) -> Result<(), ClientError> {
        self.typing.lock().unwrap().push((to.to_string(), on));
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.try_send(ClientEvent::Closed {
                reason: "closed".to_string(),
            });
        }
        Ok(())
    }
}

/// The test side of one connected session.
#[derive(Clone)]
pub struct FakeLink {
    pub options: ConnectOptions,
    pub events: mpsc::Sender<ClientEvent>,
    pub client: Arc<FakeClient>,
}

impl FakeLink {
    pub async fn emit(&self, event: ClientEvent) {
        self.events
            .send(event)
            .await
            .expect("session stopped consuming events");
    }

    pub async fn inbound(&self, chat_id: &str, text: &str) {
        self.emit(ClientEvent::Inbound(Box::new(text_message(chat_id, text))))
            .await;
    }
}

// ============================================================================
// Fake connector
// ============================================================================

#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<HashMap<String, FakeLink>>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_targets: Mutex<HashSet<String>>,
    send_delay: Mutex<Duration>,
    hang_on_close: AtomicBool,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Normalized targets that sends will fail for, in clients connected later.
    pub fn fail_target(&self, target: &str) {
        self.fail_targets.lock().unwrap().insert(target.to_string());
    }

    /// Every send waits this long first, in clients connected later.
    pub fn slow_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    /// Clients connected later never return from `close`.
    pub fn hang_on_close(&self, hang: bool) {
        self.hang_on_close.store(hang, Ordering::SeqCst);
    }

    pub fn link(&self, session: &str) -> Option<FakeLink> {
        self.links.lock().unwrap().get(session).cloned()
    }

    /// Wait until `session` has connected at least once.
    pub async fn wait_for_link(&self, session: &str) -> FakeLink {
        for _ in 0..400 {
            if let Some(link) = self.link(session) {
                return link;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {session} never connected");
    }
}

#[async_trait]
impl ClientConnector for FakeConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<ClientConnection, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::StdioUnavailable);
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = Arc::new(FakeClient {
            events: tx.clone(),
            fail_targets: self.fail_targets.lock().unwrap().clone(),
            send_delay: *self.send_delay.lock().unwrap(),
            hang_on_close: self.hang_on_close.load(Ordering::SeqCst),
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.links.lock().unwrap().insert(
            options.session.clone(),
            FakeLink {
                options,
                events: tx,
                client: client.clone(),
            },
        );

        Ok(ClientConnection { client, events: rx })
    }
}

// ============================================================================
// In-memory store and recording notifier
// ============================================================================

/// Session store that tracks directories by name only.
#[derive(Default)]
pub struct MemoryStore {
    dirs: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn with_sessions(names: &[&str]) -> Self {
        Self {
            dirs: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dirs.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.dirs.lock().unwrap().iter().cloned().collect())
    }

    async fn prepare(&self, name: &str) -> StorageResult<PathBuf> {
        self.dirs.lock().unwrap().insert(name.to_string());
        Ok(PathBuf::from("/sessions").join(name))
    }

    async fn remove(&self, name: &str) -> StorageResult<()> {
        self.dirs.lock().unwrap().remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(SessionNotification, String)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(SessionNotification, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationClient for RecordingNotifier {
    async fn notify(&self, event: SessionNotification, session: &str) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push((event, session.to_string()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: SessionController,
    pub registry: SessionRegistry,
    pub connector: Arc<FakeConnector>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub aggregator: MessageAggregator,
}

pub struct HarnessOptions {
    pub pairing_timeout: Duration,
    pub debounce: Duration,
    pub builder: Option<DownstreamRequestBuilder>,
    pub store: MemoryStore,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(60),
            debounce: Duration::from_millis(50),
            builder: None,
            store: MemoryStore::default(),
        }
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    let registry = SessionRegistry::new();
    let pipeline = ReplyPipeline::new(registry.clone(), options.builder);
    let aggregator = MessageAggregator::new(options.debounce, Arc::new(pipeline));
    let connector = Arc::new(FakeConnector::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(options.store);

    let controller = SessionController::new(ControllerDeps {
        registry: registry.clone(),
        store: store.clone(),
        connector: connector.clone(),
        notifier: notifier.clone(),
        aggregator: aggregator.clone(),
        pairing_timeout: options.pairing_timeout,
    });

    Harness {
        controller,
        registry,
        connector,
        notifier,
        store,
        aggregator,
    }
}

/// Router over a fresh harness.
pub fn test_app() -> (Router, Harness) {
    let harness = harness(HarnessOptions::default());
    let state = AppState::new(harness.controller.clone(), 64);
    (server::build_app(state, 30), harness)
}

// ============================================================================
// Helpers
// ============================================================================

pub fn text_message(chat_id: &str, text: &str) -> InboundMessageData {
    InboundMessageData {
        message_id: format!("{chat_id}-{text}"),
        chat_id: chat_id.to_string(),
        from: chat_id.to_string(),
        kind: "chat".to_string(),
        body: Some(text.to_string()),
        mime_type: None,
        is_group: false,
        timestamp: None,
    }
}

/// Poll until the session reaches `state`.
pub async fn wait_for_state(registry: &SessionRegistry, session: &str, state: SessionState) {
    for _ in 0..400 {
        if let Some(handle) = registry.get(session)
            && handle.state().await.ok() == Some(state)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {session} never reached {state}");
}

/// Poll until the session is no longer registered.
pub async fn wait_for_removal(registry: &SessionRegistry, session: &str) {
    for _ in 0..400 {
        if !registry.contains(session) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {session} is still registered");
}

/// Poll until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}
