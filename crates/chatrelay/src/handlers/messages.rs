//! Direct message sending.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chatrelay_protocol::MediaPayload;

use crate::handlers::problem_details::{self, ProblemDetails};
use crate::pipeline::{DispatchResult, OutboundPayload, decode_media, extension_for, strip_data_url};
use crate::server::AppState;

/// One phone number or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(String),
    Many(Vec<String>),
}

impl Targets {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Targets::One(target) => vec![target],
            Targets::Many(targets) => targets,
        }
    }
}

/// Base64 image sent with the message text as caption.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub data: String,
    pub mime_type: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub phone: Option<Targets>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image: Option<ImageAttachment>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub results: Vec<DispatchResult>,
}

/// POST /send-message
///
/// Sends text, or an image captioned with the text, to every listed phone.
/// Per-target failures are reported in `results`.
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected send-message body");
            return problem_details::bad_request(rejection.body_text()).into_response();
        }
    };

    let (session, targets, payload) = match validate(req) {
        Ok(parts) => parts,
        Err(problem) => return problem.into_response(),
    };

    match state
        .controller
        .send_message(&session, &targets, payload)
        .await
    {
        Ok(results) => {
            let failed = results.iter().filter(|r| !r.success).count();
            info!(
                session = %session,
                targets = results.len(),
                failed,
                "Message dispatched"
            );
            Json(SendMessageResponse {
                success: true,
                results,
            })
            .into_response()
        }
        Err(e) => ProblemDetails::from(e).into_response(),
    }
}

fn validate(
    req: SendMessageRequest,
) -> Result<(String, Vec<String>, OutboundPayload), ProblemDetails> {
    let session = req
        .session_name
        .filter(|s| !s.is_empty())
        .ok_or_else(|| problem_details::bad_request("sessionName is required"))?;

    let targets: Vec<String> = req
        .phone
        .map(Targets::into_vec)
        .unwrap_or_default()
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .collect();
    if targets.is_empty() {
        return Err(problem_details::bad_request("phone is required"));
    }

    let message = req.message.filter(|m| !m.is_empty());
    let payload = match (req.image, message) {
        (Some(image), caption) => OutboundPayload::Image {
            media: image_media(image)?,
            caption,
        },
        (None, Some(text)) => OutboundPayload::Text(text),
        (None, None) => {
            return Err(problem_details::bad_request(
                "message or image is required",
            ));
        }
    };

    Ok((session, targets, payload))
}

fn image_media(image: ImageAttachment) -> Result<MediaPayload, ProblemDetails> {
    if decode_media(&image.data).is_err() {
        return Err(problem_details::bad_request("image.data is not valid base64"));
    }
    let filename = image
        .filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| format!("image.{}", extension_for(Some(&image.mime_type))));

    Ok(MediaPayload::Base64 {
        data: strip_data_url(&image.data).to_string(),
        mime_type: image.mime_type,
        filename: Some(filename),
    })
}
