use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::debug;

use super::renderer::RenderedMessage;
use super::Notifier;

/// Telegram Bot API `sendMessage`，HTML 格式 + inline keyboard
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("创建 Telegram 客户端失败: {}", e))?;
        Ok(Self {
            client,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }
}

/// 构造 sendMessage 的请求体
pub fn send_message_payload(chat_id: &str, message: &RenderedMessage) -> JsonValue {
    let mut payload = json!({
        "chat_id": chat_id,
        "text": message.text,
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
    });

    if !message.actions.is_empty() {
        let keyboard: Vec<Vec<JsonValue>> = message
            .actions
            .iter()
            .map(|row| {
                row.iter()
                    .map(|action| json!({ "text": action.label, "url": action.url }))
                    .collect()
            })
            .collect();
        payload["reply_markup"] = json!({ "inline_keyboard": keyboard });
    }
    payload
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &RenderedMessage) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&send_message_payload(&self.chat_id, message))
            .send()
            .await?;

        let status = response.status();
        let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
        if !status.is_success() || body.get("ok").and_then(|ok| ok.as_bool()) != Some(true) {
            let description = body
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown error");
            return Err(anyhow!("Telegram 发送失败 ({}): {}", status, description));
        }

        debug!("📨 Telegram 消息已发送到 {}", self.chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::MessageAction;

    #[test]
    fn test_payload_includes_keyboard_rows() {
        let message = RenderedMessage {
            text: "<b>EAGLE BUY!</b>".to_string(),
            actions: vec![vec![MessageAction {
                label: "📈 Chart".to_string(),
                url: "https://www.dextools.io".to_string(),
            }]],
        };
        let payload = send_message_payload("-100123", &message);
        assert_eq!(payload["parse_mode"], "HTML");
        assert_eq!(payload["reply_markup"]["inline_keyboard"][0][0]["text"], "📈 Chart");

        let plain = send_message_payload("-100123", &RenderedMessage::text("hi".to_string()));
        assert!(plain.get("reply_markup").is_none());
    }
}
