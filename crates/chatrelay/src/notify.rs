//! Session connectivity notifications.
//!
//! Fired when a session becomes connected or logs out. Delivery is
//! best-effort: failures are reported to the caller, which only logs them.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::NotificationsConfig;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotification {
    Connected,
    Disconnected,
}

impl fmt::Display for SessionNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn notify(&self, event: SessionNotification, session: &str) -> Result<(), NotifyError>;
}

/// Payload for webhook notifications.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    session_name: &'a str,
    status: bool,
}

/// Posts `{sessionName, status: true}` to the configured webhook for each event.
///
/// The event is carried by the URL; `status` is always `true`.
/// Events without a configured URL are only logged.
pub struct WebhookNotifier {
    client: reqwest::Client,
    connected_url: Option<String>,
    disconnected_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            connected_url: config.connected_url.clone(),
            disconnected_url: config.disconnected_url.clone(),
        }
    }

    fn url_for(&self, event: SessionNotification) -> Option<&str> {
        match event {
            SessionNotification::Connected => self.connected_url.as_deref(),
            SessionNotification::Disconnected => self.disconnected_url.as_deref(),
        }
    }
}

#[async_trait]
impl NotificationClient for WebhookNotifier {
    async fn notify(&self, event: SessionNotification, session: &str) -> Result<(), NotifyError> {
        let Some(url) = self.url_for(event) else {
            info!(session = %session, event = %event, "Session notification");
            return Ok(());
        };

        let payload = WebhookPayload {
            session_name: session,
            status: true,
        };
        let response = self
            .client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }
        debug!(session = %session, event = %event, url = %url, "Webhook notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer) -> WebhookNotifier {
        WebhookNotifier::new(&NotificationsConfig {
            connected_url: Some(format!("{}/connected", server.uri())),
            disconnected_url: Some(format!("{}/disconnected", server.uri())),
        })
    }

    #[tokio::test]
    async fn posts_connected_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connected"))
            .and(body_json(serde_json::json!({"sessionName": "support", "status": true})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server)
            .notify(SessionNotification::Connected, "support")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn posts_disconnected_to_its_own_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/disconnected"))
            .and(body_json(serde_json::json!({"sessionName": "support", "status": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/connected"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        notifier(&server)
            .notify(SessionNotification::Disconnected, "support")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = notifier(&server)
            .notify(SessionNotification::Connected, "support")
            .await;
        assert!(matches!(result, Err(NotifyError::Status(s)) if s.as_u16() == 500));
    }

    #[tokio::test]
    async fn missing_url_falls_back_to_log() {
        let notifier = WebhookNotifier::new(&NotificationsConfig::default());
        notifier
            .notify(SessionNotification::Disconnected, "support")
            .await
            .unwrap();
    }
}
