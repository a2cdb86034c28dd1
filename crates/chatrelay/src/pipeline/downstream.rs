//! Conversational backend requests.
//!
//! A flushed batch becomes one `{from, message, sessionName}` request. Image
//! fragments are uploaded to the content host first and replaced by their
//! URL. The backend answers with a single reply object or a keyed collection
//! of them, normalized here into an ordered list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::message::{ContentKind, ConversationKey, InboundMessage};
use crate::client::SessionClient;
use super::dispatch::normalize_target;
use crate::hosting::{ContentHost, UploadError};

// ============================================================================
// Wire types
// ============================================================================

/// Request body sent to the conversational backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamRequest {
    pub from: String,
    pub message: String,
    pub session_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Text,
    /// `content` is a URL to an image.
    Image,
    /// `content` is a URL to a file.
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamReply {
    pub kind: ReplyKind,
    pub content: String,
}

impl DownstreamReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Text,
            content: content.into(),
        }
    }

    pub fn image(content: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Image,
            content: content.into(),
        }
    }
}

/// Normalize a backend response body into replies, preserving backend order.
///
/// Accepts a single `{reply, isImage?, isDocument?}` object, an array of them,
/// or an object whose values are such objects. Entries without a non-empty
/// string `reply` are skipped.
pub fn normalize_replies(body: &Value) -> Vec<DownstreamReply> {
    match body {
        Value::Array(items) => items.iter().filter_map(parse_reply).collect(),
        Value::Object(map) if map.get("reply").is_some_and(Value::is_string) => {
            parse_reply(body).into_iter().collect()
        }
        Value::Object(map) => map.values().filter_map(parse_reply).collect(),
        _ => Vec::new(),
    }
}

fn parse_reply(value: &Value) -> Option<DownstreamReply> {
    let content = value.get("reply")?.as_str()?;
    if content.is_empty() {
        return None;
    }
    let flag = |name: &str| value.get(name).and_then(Value::as_bool).unwrap_or(false);
    let kind = if flag("isImage") {
        ReplyKind::Image
    } else if flag("isDocument") {
        ReplyKind::Document
    } else {
        ReplyKind::Text
    };
    Some(DownstreamReply {
        kind,
        content: content.to_string(),
    })
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("image upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("image received but no content host is configured")]
    NoContentHost,

    #[error("invalid base64 image payload: {0}")]
    InvalidMedia(#[from] base64::DecodeError),
}

/// The downstream conversational service.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn converse(&self, request: &DownstreamRequest) -> Result<Value, BackendError>;
}

/// JSON-over-HTTP conversational backend.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn converse(&self, request: &DownstreamRequest) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // An empty body is a valid "no replies" answer.
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "Backend returned non-JSON body");
            Value::Null
        }))
    }
}

// ============================================================================
// Request builder
// ============================================================================

/// Turns a flushed batch into backend replies.
pub struct DownstreamRequestBuilder {
    backend: Arc<dyn ConversationBackend>,
    content_host: Option<Arc<dyn ContentHost>>,
    path_hint: String,
}

impl DownstreamRequestBuilder {
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        content_host: Option<Arc<dyn ContentHost>>,
        path_hint: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            content_host,
            path_hint: path_hint.into(),
        }
    }

    /// Ask the backend for replies to `batch`.
    ///
    /// Typing is shown in the conversation for the duration of the call and
    /// cleared on every path. A failed image upload fails the whole batch
    /// before the backend is called.
    pub async fn run(
        &self,
        client: &dyn SessionClient,
        key: &ConversationKey,
        batch: &[InboundMessage],
    ) -> Result<Vec<DownstreamReply>, BackendError> {
        let target = normalize_target(&key.chat_id);
        if let Err(e) = client.set_typing(&target, true).await {
            debug!(conversation = %key, error = %e, "Failed to start typing");
        }

        let result = self.request_replies(key, batch).await;

        if let Err(e) = client.set_typing(&target, false).await {
            debug!(conversation = %key, error = %e, "Failed to stop typing");
        }
        result
    }

    async fn request_replies(
        &self,
        key: &ConversationKey,
        batch: &[InboundMessage],
    ) -> Result<Vec<DownstreamReply>, BackendError> {
        let request = self.build(key, batch).await?;
        debug!(
            conversation = %key,
            fragments = batch.len(),
            "Calling conversational backend"
        );
        let body = self.backend.converse(&request).await?;
        Ok(normalize_replies(&body))
    }

    /// Build the backend request for a batch.
    pub async fn build(
        &self,
        key: &ConversationKey,
        batch: &[InboundMessage],
    ) -> Result<DownstreamRequest, BackendError> {
        let mut fragments = Vec::with_capacity(batch.len());
        for message in batch {
            match message.kind {
                ContentKind::Image => fragments.push(self.upload_image(key, message).await?),
                ContentKind::Text | ContentKind::Other => {
                    fragments.push(message.payload.clone().unwrap_or_default());
                }
            }
        }

        let from = batch
            .first()
            .map(|m| m.sender.clone())
            .unwrap_or_else(|| key.chat_id.clone());

        Ok(DownstreamRequest {
            from,
            message: fragments.join(" "),
            session_name: key.session.clone(),
        })
    }

    /// Upload an inbound image and return its URL.
    async fn upload_image(
        &self,
        key: &ConversationKey,
        message: &InboundMessage,
    ) -> Result<String, BackendError> {
        let host = self.content_host.as_ref().ok_or(BackendError::NoContentHost)?;
        let bytes = decode_media(message.payload.as_deref().unwrap_or_default())?;

        let filename = format!("image.{}", extension_for(message.mime_type.as_deref()));
        let url = host.upload(bytes, &filename, &self.path_hint).await?;
        debug!(conversation = %key, url = %url, "Image uploaded");
        Ok(url)
    }
}

/// Decode base64 media, accepting an optional `data:<mime>;base64,` prefix.
pub(crate) fn decode_media(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(strip_data_url(encoded))
}

/// Base64 body of `encoded` without any `data:<mime>;base64,` prefix.
pub(crate) fn strip_data_url(encoded: &str) -> &str {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, d)| d).unwrap_or(rest),
        None => encoded,
    };
    data.trim()
}

/// File extension for an image mime type; `jpg` when unknown.
pub(crate) fn extension_for(mime_type: Option<&str>) -> &'static str {
    match mime_type.map(|m| m.split(';').next().unwrap_or(m).trim()) {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/bmp") => "bmp",
        _ => "jpg",
    }
}
