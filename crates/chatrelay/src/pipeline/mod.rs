//! Inbound aggregation and reply dispatch.
//!
//! Inbound messages are buffered per conversation by the [`MessageAggregator`].
//! When a conversation goes quiet its batch is handed to a [`BatchProcessor`];
//! the production processor ([`ReplyPipeline`]) asks the conversational
//! backend for replies and delivers them with the [`OutboundDispatcher`].

mod aggregator;
mod dispatch;
mod downstream;
mod message;
mod processor;

pub use aggregator::{BatchProcessor, MessageAggregator};
pub use dispatch::{DispatchResult, OutboundDispatcher, OutboundPayload, normalize_target};
pub(crate) use downstream::{decode_media, extension_for, strip_data_url};
pub use downstream::{
    BackendError, ConversationBackend, DownstreamReply, DownstreamRequest,
    DownstreamRequestBuilder, HttpBackend, ReplyKind, normalize_replies,
};
pub use message::{ContentKind, ConversationKey, InboundMessage};
pub use processor::ReplyPipeline;
