use crate::error::{HailstormError, Result};
use crate::notification::{format_message, NotificationEvent, Notifier};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends notifications to a Telegram chat via the Bot API.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self::with_api_base(bot_token, chat_id, TELEGRAM_API.to_string())
    }

    /// Point the notifier at a different Bot API host (self-hosted Bot API
    /// server, or a mock in tests).
    pub fn with_api_base(bot_token: String, chat_id: String, api_base: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let text = format_message(event);
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .map_err(|e| HailstormError::Notification(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(HailstormError::Notification(format!(
                "Telegram API error {}: {}",
                status, body
            )));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
