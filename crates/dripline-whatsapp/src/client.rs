// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the WhatsApp gateway.
//!
//! Each send is one `POST` of a JSON body to the configured endpoint. The
//! response status decides whether a failure is worth retrying.

use std::time::Duration;

use async_trait::async_trait;
use dripline_config::model::SenderConfig;
use dripline_core::{DriplineError, Message, SendError, Sender};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

/// Request body accepted by the gateway.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    device_id: &'a str,
    phone: &'a str,
    message: &'a str,
    media_url: Option<&'a str>,
    message_id: &'a str,
}

/// [`Sender`] that posts messages to a WhatsApp gateway.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSender {
    /// Builds a sender from the `[sender]` config section.
    ///
    /// Fails when no endpoint is configured or the API key is not a valid
    /// header value.
    pub fn from_config(config: &SenderConfig) -> Result<Self, DriplineError> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| DriplineError::Config("sender.endpoint is not set".into()))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                DriplineError::Config(format!("invalid sender api_key header value: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DriplineError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Sender for HttpSender {
    fn name(&self) -> &str {
        "whatsapp-http"
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let body = SendRequest {
            device_id: &message.device_id,
            phone: &message.recipient_phone,
            message: &message.content,
            media_url: message.media_url.as_deref(),
            message_id: &message.id,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("gateway request failed: {e}")))?;

        let status = response.status();
        debug!(message_id = %message.id, status = %status, "gateway responded");
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        let reason = if detail.trim().is_empty() {
            format!("gateway returned {status}")
        } else {
            format!("gateway returned {status}: {}", detail.trim())
        };
        if is_transient_status(status) {
            warn!(message_id = %message.id, %reason, "transient gateway failure");
            Err(SendError::Transient(reason))
        } else {
            Err(SendError::Permanent(reason))
        }
    }
}

/// Server errors plus the two client statuses that mean "try again later".
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || matches!(status.as_u16(), 408 | 429)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dripline_core::MessageSource;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender_for(server: &MockServer, api_key: Option<&str>) -> HttpSender {
        HttpSender::from_config(&SenderConfig {
            endpoint: Some(format!("{}/send", server.uri())),
            timeout_secs: 5,
            api_key: api_key.map(str::to_string),
        })
        .unwrap()
    }

    fn message() -> Message {
        Message::pending(
            "msg-1".into(),
            "user-1".into(),
            "dev-1".into(),
            MessageSource::Campaign { campaign_id: 7 },
            "60123456789".into(),
            "Aisyah".into(),
            "Hello Aisyah".into(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn posts_message_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({
                "device_id": "dev-1",
                "phone": "60123456789",
                "message": "Hello Aisyah",
                "media_url": null,
                "message_id": "msg-1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = sender_for(&server, Some("secret"));
        sender.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("number not on whatsapp"))
            .mount(&server)
            .await;

        let err = sender_for(&server, None).send(&message()).await.unwrap_err();
        match err {
            SendError::Permanent(reason) => {
                assert!(reason.contains("number not on whatsapp"), "got: {reason}")
            }
            other => panic!("expected permanent failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_and_rate_limit_are_transient() {
        for status in [503, 429] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = sender_for(&server, None).send(&message()).await.unwrap_err();
            assert!(matches!(err, SendError::Transient(_)), "status {status}: {err:?}");
        }
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let sender = HttpSender::from_config(&SenderConfig {
            endpoint: Some(server.uri()),
            timeout_secs: 1,
            api_key: None,
        })
        .unwrap();
        let err = sender.send(&message()).await.unwrap_err();
        assert!(matches!(err, SendError::Transient(_)), "got {err:?}");
    }

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let err = HttpSender::from_config(&SenderConfig::default()).unwrap_err();
        assert!(matches!(err, DriplineError::Config(_)));
    }
}
