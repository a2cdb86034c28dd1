use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::session::SessionController;

/// Request bodies carry base64 attachments.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 15;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub max_connections: usize,
    pub keep_alive_interval_seconds: u64,
}

impl AppState {
    pub fn new(controller: SessionController, max_connections: usize) -> Self {
        Self {
            controller,
            max_connections,
            keep_alive_interval_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // SSE streaming and bulk sends - no request timeout. A send waits on one
    // acknowledgement per target, so its duration grows with the target list.
    let long_running_routes = Router::new()
        .route(
            "/qrcode/{name}/events",
            get(handlers::stream_pairing_codes),
        )
        .route("/send-message", post(handlers::send_message))
        .with_state(state.clone());

    // Regular API routes - with request timeout
    let api_routes = Router::new()
        .route(
            "/session/{name}",
            post(handlers::create_session).delete(handlers::delete_session),
        )
        .route("/sessions", get(handlers::list_sessions))
        .route("/qrcode/{name}", get(handlers::get_pairing_code))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let control = Router::new()
        .merge(long_running_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(max_connections));

    Router::new()
        .route("/livez", get(handlers::livez))
        .merge(control)
        .fallback(handlers::fallback)
}
