use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

// Long-poll window for getUpdates; kept below the client timeout.
const POLL_TIMEOUT_SECS: u32 = 20;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, token }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_URL, self.token, method)
    }

    /// Send one text message. A recipient that blocked the bot, deleted their
    /// account or whose chat is gone surfaces as `RecipientUnreachable` so the
    /// dispatcher can clean up their subscriptions.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: ApiError = response.json().await.unwrap_or_default();
        let description = body.description.unwrap_or_default();

        if is_unreachable(body.error_code.unwrap_or(status.as_u16() as i64), &description) {
            return Err(AppError::RecipientUnreachable(chat_id));
        }
        Err(AppError::TelegramApi(format!(
            "sendMessage to {} failed with HTTP {}: {}",
            chat_id, status, description
        )))
    }

    /// Long-poll for inbound updates past `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::TelegramApi(format!(
                "getUpdates failed with HTTP {}",
                status
            )));
        }

        let body: UpdatesResponse = response.json().await?;
        Ok(body.result)
    }
}

/// The platform reports a permanently unreachable recipient as 403 (bot
/// blocked, user deactivated) or as 400 with a "chat not found" description.
fn is_unreachable(error_code: i64, description: &str) -> bool {
    error_code == 403
        || description.contains("chat not found")
        || description.contains("user is deactivated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_recipient_is_unreachable() {
        assert!(is_unreachable(403, "Forbidden: bot was blocked by the user"));
        assert!(is_unreachable(403, "Forbidden: user is deactivated"));
        assert!(is_unreachable(400, "Bad Request: chat not found"));
    }

    #[test]
    fn transient_failures_are_not_unreachable() {
        assert!(!is_unreachable(429, "Too Many Requests: retry after 5"));
        assert!(!is_unreachable(400, "Bad Request: message is too long"));
        assert!(!is_unreachable(500, ""));
    }

    #[test]
    fn updates_response_parses_api_shape() {
        let body = r#"{
            "ok": true,
            "result": [
                {
                    "update_id": 1001,
                    "message": {
                        "message_id": 5,
                        "chat": {"id": 42, "type": "private"},
                        "date": 1700000000,
                        "text": "/list"
                    }
                },
                {"update_id": 1002}
            ]
        }"#;

        let parsed: UpdatesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result.len(), 2);
        let msg = parsed.result[0].message.as_ref().unwrap();
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.text.as_deref(), Some("/list"));
        assert!(parsed.result[1].message.is_none());
    }
}
