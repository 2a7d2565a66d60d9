// # Slack Messenger
//
// This crate provides the Slack implementation of the drivewatch `Messenger`
// trait, posting through the Web API `chat.postMessage` method.
//
// ## Implementation Status
//
// - ✅ One HTTP request per message
// - ✅ Slack error labels mapped to `DeliveryError`
// - ✅ HTTP timeout configured
// - ❌ NO retry logic (the notifier decides on fallbacks)
// - ❌ NO channel lookups (the notifier owns the direct-message fallback)
//
// ## Trust Level: Untrusted (Messenger)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTPS calls to the Slack Web API only
// - ✅ Parse Slack responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Choose another destination on failure
//
// ## Security Requirements
//
// - The per-subscriber token is passed per call and NEVER logged
//
// ## API Reference
//
// - `POST /api/chat.postMessage` (form encoded, `attachments` as a JSON string)
// - Responses always carry `{"ok": bool, "error": "<label>"}`

use async_trait::async_trait;
use drivewatch_core::config::SlackConfig;
use drivewatch_core::error::DeliveryError;
use drivewatch_core::traits::{Message, Messenger};
use drivewatch_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default HTTP timeout for API requests (15 seconds)
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Slack Web API messenger
#[derive(Debug)]
pub struct SlackMessenger {
    client: reqwest::Client,

    /// Web API base, e.g. `https://slack.com/api`
    api_base: String,
}

impl SlackMessenger {
    /// Create a new Slack messenger
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API base is not an HTTP(S) URL or the
    /// HTTP client cannot be built.
    pub fn new(config: &SlackConfig, timeout: Duration) -> Result<Self> {
        if !config.api_base.starts_with("https://") && !config.api_base.starts_with("http://") {
            return Err(Error::config(format!(
                "Slack API base must be an HTTP(S) URL. Got: {}",
                config.api_base
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn post_message_url(&self) -> String {
        format!("{}/chat.postMessage", self.api_base)
    }
}

#[async_trait]
impl Messenger for SlackMessenger {
    async fn post_message(
        &self,
        access_token: &str,
        message: &Message,
    ) -> std::result::Result<(), DeliveryError> {
        let attachments = serde_json::to_string(&message.attachments)
            .map_err(|e| DeliveryError::Unknown(format!("cannot encode attachments: {}", e)))?;

        let form = [
            ("token", access_token),
            ("channel", message.channel.as_str()),
            ("username", message.username.as_str()),
            ("text", message.text.as_str()),
            ("icon_url", message.icon_url.as_str()),
            ("attachments", attachments.as_str()),
        ];

        tracing::debug!(
            "Posting to {} ({} attachment(s))",
            message.channel,
            message.attachments.len()
        );

        let response = self
            .client
            .post(self.post_message_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryError::CannotConnect(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::CannotConnect(e.to_string()))?;

        interpret_response(status, &body)
    }

    fn messenger_name(&self) -> &'static str {
        "slack"
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Turn a `chat.postMessage` response into a delivery outcome
fn interpret_response(status: u16, body: &str) -> std::result::Result<(), DeliveryError> {
    match serde_json::from_str::<ApiResponse>(body) {
        Ok(ApiResponse { ok: true, .. }) if (200..300).contains(&status) => Ok(()),
        Ok(ApiResponse {
            error: Some(code), ..
        }) => Err(DeliveryError::from_code(&code)),
        Ok(_) if status == 429 => Err(DeliveryError::RateLimited),
        Ok(_) => Err(DeliveryError::Unknown(format!("HTTP {}", status))),
        Err(_) if status == 429 => Err(DeliveryError::RateLimited),
        Err(e) => Err(DeliveryError::CannotDeserialize(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewatch_core::traits::{Attachment, Field};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn message() -> Message {
        Message {
            channel: "#drive".to_string(),
            username: "Google Drive".to_string(),
            text: "Activity on gdrive".to_string(),
            icon_url: "https://example.com/icon.png?ck=1".to_string(),
            attachments: vec![Attachment {
                fallback: "Modified file report".to_string(),
                color: "#ccccff".to_string(),
                fields: vec![Field {
                    title: "Modified file".to_string(),
                    value: "<https://docs.example.com/report|report>".to_string(),
                    short: true,
                }],
            }],
        }
    }

    fn config(api_base: &str) -> SlackConfig {
        SlackConfig {
            api_base: api_base.to_string(),
            ..SlackConfig::default()
        }
    }

    /// Accept one connection, reply with `body`, and return the raw request
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&data).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .and_then(|v| v.trim().parse::<usize>().ok())
                        })
                        .unwrap_or(0);
                    if data.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&data).to_string()
        });

        (base, task)
    }

    #[test]
    fn test_ok_response_is_delivered() {
        assert_eq!(interpret_response(200, r#"{"ok": true, "ts": "1.2"}"#), Ok(()));
    }

    #[test]
    fn test_error_labels_map_to_delivery_errors() {
        assert_eq!(
            interpret_response(200, r#"{"ok": false, "error": "channel_not_found"}"#),
            Err(DeliveryError::ChannelNotFound)
        );
        assert_eq!(
            interpret_response(200, r#"{"ok": false, "error": "token_revoked"}"#),
            Err(DeliveryError::TokenRevoked)
        );
        assert_eq!(
            interpret_response(200, r#"{"ok": false, "error": "something_new"}"#),
            Err(DeliveryError::Unknown("something_new".to_string()))
        );
    }

    #[test]
    fn test_http_level_failures() {
        assert_eq!(interpret_response(429, ""), Err(DeliveryError::RateLimited));
        assert!(matches!(
            interpret_response(502, "<html>bad gateway</html>"),
            Err(DeliveryError::CannotDeserialize(_))
        ));
        assert!(matches!(
            interpret_response(500, r#"{"ok": false}"#),
            Err(DeliveryError::Unknown(_))
        ));
    }

    #[test]
    fn test_rejects_non_http_api_base() {
        assert!(SlackMessenger::new(&config("slack.com/api"), DEFAULT_HTTP_TIMEOUT).is_err());
        assert!(SlackMessenger::new(&SlackConfig::default(), DEFAULT_HTTP_TIMEOUT).is_ok());
    }

    #[test]
    fn test_messenger_name() {
        let messenger = SlackMessenger::new(&SlackConfig::default(), DEFAULT_HTTP_TIMEOUT).unwrap();
        assert_eq!(messenger.messenger_name(), "slack");
    }

    #[tokio::test]
    async fn test_post_message_sends_form_with_json_attachments() {
        let (base, server) = serve_once(r#"{"ok": true}"#).await;
        let messenger = SlackMessenger::new(&config(&base), DEFAULT_HTTP_TIMEOUT).unwrap();

        messenger.post_message("xoxp-token", &message()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat.postMessage"));
        assert!(request.contains("application/x-www-form-urlencoded"));
        assert!(request.contains("token=xoxp-token"));
        assert!(request.contains("channel=%23drive"));
        // attachments=[{"fallback":... url-encoded
        assert!(request.contains("attachments=%5B%7B%22fallback%22"));
    }

    #[tokio::test]
    async fn test_post_message_reports_slack_error() {
        let (base, _server) = serve_once(r#"{"ok": false, "error": "is_archived"}"#).await;
        let messenger = SlackMessenger::new(&config(&base), DEFAULT_HTTP_TIMEOUT).unwrap();

        let err = messenger.post_message("xoxp-token", &message()).await.unwrap_err();
        assert_eq!(err, DeliveryError::IsArchived);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_cannot_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());
        drop(listener);

        let messenger = SlackMessenger::new(&config(&base), DEFAULT_HTTP_TIMEOUT).unwrap();
        let err = messenger.post_message("xoxp-token", &message()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::CannotConnect(_)));
    }
}
