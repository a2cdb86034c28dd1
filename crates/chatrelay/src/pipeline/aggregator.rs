//! Per-conversation debounce buffers.
//!
//! Every inbound message lands in its conversation's buffer and restarts that
//! conversation's quiet-window timer. When the timer fires, the buffer is
//! removed from the map in one step and processed as a single batch; anything
//! arriving afterwards starts a new buffer.
//!
//! Batches of the same conversation are processed one at a time behind a
//! per-conversation flush lock. Different conversations never wait on each
//! other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::message::{ConversationKey, InboundMessage};

/// Consumer of flushed batches.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, key: &ConversationKey, batch: Vec<InboundMessage>);
}

/// Unflushed messages of one conversation plus its armed timer.
struct ConversationBuffer {
    messages: Vec<InboundMessage>,
    /// Bumped on every push; a timer only flushes the generation it was armed for.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct AggregatorInner {
    buffers: DashMap<ConversationKey, ConversationBuffer>,
    flush_locks: DashMap<ConversationKey, Arc<Mutex<()>>>,
    quiet_window: Duration,
    processor: Arc<dyn BatchProcessor>,
    next_generation: AtomicU64,
}

/// Debounces inbound messages per conversation.
#[derive(Clone)]
pub struct MessageAggregator {
    inner: Arc<AggregatorInner>,
}

impl MessageAggregator {
    pub fn new(quiet_window: Duration, processor: Arc<dyn BatchProcessor>) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                buffers: DashMap::new(),
                flush_locks: DashMap::new(),
                quiet_window,
                processor,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Buffer a message and (re)start its conversation's timer.
    pub fn push(&self, message: InboundMessage) {
        let key = message.conversation();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut buffer = self
            .inner
            .buffers
            .entry(key.clone())
            .or_insert_with(|| ConversationBuffer {
                messages: Vec::new(),
                generation,
                timer: None,
            });
        buffer.messages.push(message);
        buffer.generation = generation;
        if let Some(previous) = buffer.timer.take() {
            previous.abort();
        }

        debug!(
            conversation = %key,
            buffered = buffer.messages.len(),
            "Message buffered"
        );

        let inner = Arc::clone(&self.inner);
        let window = self.inner.quiet_window;
        buffer.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            inner.flush(key, generation);
        }));
    }

    /// Drop every buffer and timer belonging to `session`.
    ///
    /// Batches already handed to the processor are not interrupted.
    pub fn purge_session(&self, session: &str) {
        let mut purged = 0usize;
        self.inner.buffers.retain(|key, buffer| {
            if key.session != session {
                return true;
            }
            if let Some(timer) = buffer.timer.take() {
                timer.abort();
            }
            purged += 1;
            false
        });
        self.inner
            .flush_locks
            .retain(|key, _| key.session != session);

        if purged > 0 {
            debug!(session = %session, conversations = purged, "Purged conversation buffers");
        }
    }

    /// Number of conversations of `session` with unflushed messages.
    pub fn pending_conversations(&self, session: &str) -> usize {
        self.inner
            .buffers
            .iter()
            .filter(|entry| entry.key().session == session)
            .count()
    }

    /// Number of messages waiting in one conversation's buffer.
    pub fn buffered(&self, key: &ConversationKey) -> usize {
        self.inner
            .buffers
            .get(key)
            .map(|buffer| buffer.messages.len())
            .unwrap_or(0)
    }
}

impl AggregatorInner {
    /// Take the buffer if it still belongs to `generation` and process it.
    ///
    /// Runs synchronously up to the spawn so an abort from a concurrent push
    /// can never split the take from the hand-off.
    fn flush(self: Arc<Self>, key: ConversationKey, generation: u64) {
        let Some((key, buffer)) = self
            .buffers
            .remove_if(&key, |_, buffer| buffer.generation == generation)
        else {
            return;
        };

        let lock = self
            .flush_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::spawn(async move {
            {
                let _guard = lock.lock().await;
                debug!(
                    conversation = %key,
                    messages = buffer.messages.len(),
                    "Flushing conversation"
                );
                self.processor.process(&key, buffer.messages).await;
            }
            drop(lock);
            self.flush_locks
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        });
    }
}
