//! HTTP request handlers.

mod health;
mod messages;
pub mod problem_details;
mod sessions;

pub use health::livez;
pub use messages::{ImageAttachment, SendMessageRequest, SendMessageResponse, Targets, send_message};
pub use sessions::{
    PAIRING_EVENT, create_session, delete_session, get_pairing_code, list_sessions,
    stream_pairing_codes,
};

use problem_details::ProblemDetails;

/// Problem response for unknown routes.
pub async fn fallback() -> ProblemDetails {
    problem_details::not_found("no such route")
}
