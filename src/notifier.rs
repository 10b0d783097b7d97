//! Telegram notifications for per-account run reports
//!
//! Delivery is best-effort and at most once per drain: failures are logged
//! and never fed back into the scheduler.

use reqwest::Client;
use serde_json::json;
use tracing::{debug, error};

/// Telegram notifier; a missing token/chat id turns it into a no-op
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    target: Option<(String, String)>,
}

impl Notifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            target: bot_token.zip(chat_id),
        }
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Send one account report blob
    pub async fn send(&self, text: &str) {
        let Some((token, chat_id)) = &self.target else {
            debug!("Telegram not configured, report not sent");
            return;
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("Report delivered to Telegram");
                } else {
                    error!("Telegram rejected report: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send Telegram report: {}", e);
            }
        }
    }
}
