use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::aggregator::BatchProcessor;
use super::dispatch::OutboundDispatcher;
use super::downstream::DownstreamRequestBuilder;
use super::message::{ConversationKey, InboundMessage};
use crate::session::SessionRegistry;

/// Production batch processor: backend call, then reply delivery.
pub struct ReplyPipeline {
    registry: SessionRegistry,
    /// `None` when no backend is configured; batches are dropped.
    builder: Option<DownstreamRequestBuilder>,
    dispatcher: OutboundDispatcher,
}

impl ReplyPipeline {
    pub fn new(registry: SessionRegistry, builder: Option<DownstreamRequestBuilder>) -> Self {
        Self {
            registry,
            builder,
            dispatcher: OutboundDispatcher,
        }
    }
}

#[async_trait]
impl BatchProcessor for ReplyPipeline {
    async fn process(&self, key: &ConversationKey, batch: Vec<InboundMessage>) {
        let Some(builder) = &self.builder else {
            warn!(conversation = %key, messages = batch.len(), "No backend configured, dropping batch");
            return;
        };

        let client = match self.registry.get(&key.session) {
            Some(handle) => handle.client().await.ok().flatten(),
            None => None,
        };
        let Some(client) = client else {
            debug!(conversation = %key, "Session gone before flush, dropping batch");
            return;
        };

        let replies = match builder.run(client.as_ref(), key, &batch).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(conversation = %key, error = %e, "Batch failed, no reply sent");
                return;
            }
        };

        if replies.is_empty() {
            debug!(conversation = %key, "Backend returned no replies");
            return;
        }

        let results = self
            .dispatcher
            .deliver_replies(client.as_ref(), &key.chat_id, &replies)
            .await;
        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            conversation = %key,
            replies = results.len(),
            failed,
            "Replies delivered"
        );
    }
}
