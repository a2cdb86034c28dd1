//! RFC 7807 problem details for error responses.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::session::SessionError;

pub const CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            problem_type: "about:blank".to_string(),
            title: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            status: status.as_u16(),
            detail: Some(detail.into()),
        }
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], Json(self)).into_response()
    }
}

pub fn bad_request(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::BAD_REQUEST, detail)
}

pub fn not_found(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::NOT_FOUND, detail)
}

pub fn conflict(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::CONFLICT, detail)
}

pub fn internal_error(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
}

impl From<SessionError> for ProblemDetails {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) | SessionError::PairingUnavailable(_) => {
                not_found(e.to_string())
            }
            SessionError::Conflict(_) | SessionError::NotReady(_) => conflict(e.to_string()),
            SessionError::InvalidName(_) | SessionError::InvalidRequest(_) => {
                bad_request(e.to_string())
            }
            SessionError::ActorShutdown | SessionError::Storage(_) => {
                error!(error = %e, "Session operation failed");
                internal_error("session operation failed")
            }
        }
    }
}
