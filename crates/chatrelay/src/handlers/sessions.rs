//! Session management HTTP handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::handlers::problem_details::ProblemDetails;
use crate::server::AppState;
use crate::session::{PairingUpdate, SessionError, SessionSummary};

/// SSE event name for pairing codes.
pub const PAIRING_EVENT: &str = "qr";

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct PairingCodeResponse {
    #[serde(rename = "qrCode")]
    pub qr_code: String,
}

/// POST /session/{name}
pub async fn create_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.controller.create_session(&name).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(MessageResponse {
                message: format!("Session {name} created"),
            }),
        )
            .into_response(),
        Err(e) => ProblemDetails::from(e).into_response(),
    }
}

/// DELETE /session/{name}
///
/// Succeeds whether or not the session exists.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.controller.remove_session(&name).await {
        Ok(()) => Json(MessageResponse {
            message: format!("Session {name} removed"),
        })
        .into_response(),
        Err(e) => ProblemDetails::from(e).into_response(),
    }
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse {
        sessions: state.controller.list_sessions().await,
    })
}

/// GET /qrcode/{name}
pub async fn get_pairing_code(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.controller.pairing_artifact(&name).await {
        Ok(qr_code) => Json(PairingCodeResponse { qr_code }).into_response(),
        Err(e) => ProblemDetails::from(e).into_response(),
    }
}

/// GET /qrcode/{name}/events
///
/// Streams every pairing code issued for the session as a `qr` event,
/// starting with the current one when the session is already waiting.
pub async fn stream_pairing_codes(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    // Subscribe first so a code issued during the lookup is not missed.
    let updates = state.controller.subscribe_pairing();

    let current = match state.controller.pairing_artifact(&name).await {
        Ok(code) => Some(code),
        Err(SessionError::PairingUnavailable(_)) => None,
        Err(e) => return ProblemDetails::from(e).into_response(),
    };

    debug!(session = %name, "Starting pairing code stream");

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(pairing_events(name, current, BroadcastStream::new(updates)))
        .keep_alive(keep_alive)
        .into_response()
}

fn pairing_events(
    session: String,
    current: Option<String>,
    updates: BroadcastStream<PairingUpdate>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let live = updates.filter_map(move |update| {
        let event = match update {
            Ok(update) if update.session == session => Some(update.artifact),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(session = %session, skipped, "Pairing stream lagged");
                None
            }
        };
        std::future::ready(event)
    });

    stream::iter(current)
        .chain(live)
        .map(|code| Ok(Event::default().event(PAIRING_EVENT).data(code)))
}
