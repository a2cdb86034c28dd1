//! Outbound delivery through a session client.
//!
//! Every send is isolated: a failed target or reply is recorded in its own
//! [`DispatchResult`] and never stops the sends after it. Nothing is retried.

use serde::Serialize;
use tracing::{debug, warn};

use chatrelay_protocol::MediaPayload;

use super::downstream::{DownstreamReply, ReplyKind};
use crate::client::{ClientError, SendReceipt, SessionClient};

/// Suffix appended to normalized phone numbers.
pub const CONTACT_SUFFIX: &str = "@c.us";

/// Normalize a phone number or chat id into a target address.
///
/// Every non-digit is stripped and [`CONTACT_SUFFIX`] appended, so
/// `"(11) 98888-7777"`, `"11988887777"` and `"11988887777@c.us"` all map to
/// `"11988887777@c.us"`.
pub fn normalize_target(raw: &str) -> String {
    let mut target: String = raw.chars().filter(char::is_ascii_digit).collect();
    target.push_str(CONTACT_SUFFIX);
    target
}

/// Outcome of one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// Normalized target address.
    #[serde(rename = "number")]
    pub target: String,
    pub success: bool,
    /// Platform message id on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    fn from_send(target: String, outcome: Result<SendReceipt, ClientError>) -> Self {
        match outcome {
            Ok(receipt) => Self {
                target,
                success: true,
                result: receipt.message_id,
                error: None,
            },
            Err(e) => Self {
                target,
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Caller-supplied content for a direct send.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Text(String),
    /// Image with the message text as caption.
    Image {
        media: MediaPayload,
        caption: Option<String>,
    },
}

/// Sends caller payloads and backend replies through a session client.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboundDispatcher;

impl OutboundDispatcher {
    /// Send `payload` to every target, in order. One result per target.
    pub async fn dispatch(
        &self,
        client: &dyn SessionClient,
        targets: &[String],
        payload: &OutboundPayload,
    ) -> Vec<DispatchResult> {
        let mut results = Vec::with_capacity(targets.len());
        for raw in targets {
            let target = normalize_target(raw);
            if target == CONTACT_SUFFIX {
                results.push(DispatchResult {
                    target: raw.clone(),
                    success: false,
                    result: None,
                    error: Some("target contains no digits".to_string()),
                });
                continue;
            }

            let outcome = match payload {
                OutboundPayload::Text(text) => client.send_text(&target, text).await,
                OutboundPayload::Image { media, caption } => {
                    client
                        .send_image(&target, media.clone(), caption.as_deref())
                        .await
                }
            };
            log_outcome(&target, &outcome);
            results.push(DispatchResult::from_send(target, outcome));
        }
        results
    }

    /// Deliver backend replies to one conversation, in order.
    pub async fn deliver_replies(
        &self,
        client: &dyn SessionClient,
        chat_id: &str,
        replies: &[DownstreamReply],
    ) -> Vec<DispatchResult> {
        let target = normalize_target(chat_id);
        let mut results = Vec::with_capacity(replies.len());
        for reply in replies {
            let outcome = match reply.kind {
                ReplyKind::Text => client.send_text(&target, &reply.content).await,
                ReplyKind::Image => {
                    client
                        .send_image(&target, MediaPayload::url(&reply.content), None)
                        .await
                }
                ReplyKind::Document => {
                    let filename = document_filename(&reply.content);
                    client
                        .send_document(&target, MediaPayload::url(&reply.content), Some(filename))
                        .await
                }
            };
            log_outcome(&target, &outcome);
            results.push(DispatchResult::from_send(target.clone(), outcome));
        }
        results
    }
}

fn log_outcome(target: &str, outcome: &Result<SendReceipt, ClientError>) {
    match outcome {
        Ok(_) => debug!(target = %target, "Message sent"),
        Err(e) => warn!(target = %target, error = %e, "Send failed"),
    }
}

/// Last path segment of a document URL, or `file`.
fn document_filename(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && name.contains('.') => name,
        _ => "file",
    }
}
