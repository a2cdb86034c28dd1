//! Content hosting for inbound media.
//!
//! Images received from a chat are uploaded here so the conversational
//! backend gets a URL instead of raw bytes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("content host returned {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait ContentHost: Send + Sync {
    /// Store `bytes` and return a URL that serves them.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        path_hint: &str,
    ) -> Result<String, UploadError>;
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// Multipart upload endpoint taking `path` and `file` form fields and
/// answering `{url}`.
pub struct HttpContentHost {
    client: reqwest::Client,
    url: String,
}

impl HttpContentHost {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ContentHost for HttpContentHost {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        path_hint: &str,
    ) -> Result<String, UploadError> {
        let size = bytes.len();
        let form = Form::new()
            .text("path", path_hint.to_string())
            .part("file", Part::bytes(bytes).file_name(filename.to_string()));

        let response = self
            .client
            .post(&self.url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UploadError::Status(response.status()));
        }

        let body: UploadResponse = response.json().await?;
        debug!(filename = %filename, bytes = size, url = %body.url, "Media uploaded");
        Ok(body.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upload_sends_multipart_and_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shared/image"))
            .and(body_string_contains("name=\"path\""))
            .and(body_string_contains("whatsapp"))
            .and(body_string_contains("filename=\"image.png\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"url": "https://cdn.example/abc.png"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let host = HttpContentHost::new(format!("{}/shared/image", server.uri()));
        let url = host
            .upload(b"png-bytes".to_vec(), "image.png", "whatsapp")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/abc.png");
    }

    #[tokio::test]
    async fn upload_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413))
            .mount(&server)
            .await;

        let host = HttpContentHost::new(server.uri());
        let result = host.upload(vec![1, 2, 3], "image.jpg", "whatsapp").await;
        assert!(matches!(result, Err(UploadError::Status(s)) if s.as_u16() == 413));
    }
}
