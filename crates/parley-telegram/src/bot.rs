use parley_core::error::{ParleyError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::types::*;

/// Thin client for the Telegram Bot API.
///
/// Every call goes through [`TelegramBot::call`], which maps a non-2xx status to
/// [`ParleyError::Http`] (keeping the body so callers can recognise rejected
/// markup) and an `ok: false` envelope to [`ParleyError::Telegram`].
#[derive(Clone)]
pub struct TelegramBot {
    client: Client,
    token: String,
    base_url: String,
}

impl TelegramBot {
    pub fn new(token: String) -> Self {
        let base_url = format!("https://api.telegram.org/bot{token}");
        Self {
            client: Client::new(),
            token,
            base_url,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let url = format!("{}/{method}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ParleyError::Telegram(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| ParleyError::Telegram(e.to_string()))?;

        if !envelope.ok {
            return Err(ParleyError::Telegram(
                envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        envelope
            .result
            .ok_or_else(|| ParleyError::Telegram(format!("missing result in {method} response")))
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for new messages and button presses.
    pub async fn get_updates(&self, offset: i64, timeout: u32) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body).await
    }

    /// Send a message and return its message_id.
    ///
    /// `parse_mode` is passed through verbatim ("HTML" or None for plain text).
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = json!(mode);
        }
        if let Some(markup) = keyboard {
            body["reply_markup"] =
                serde_json::to_value(markup).map_err(|e| ParleyError::Telegram(e.to_string()))?;
        }

        let sent: TelegramMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    /// Replace a message's text. Unchanged text is not an error.
    pub async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        match self.call::<Value>("editMessageText", &body).await {
            Err(ParleyError::Http { body, .. }) if body.contains("message is not modified") => {
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call::<bool>("deleteMessage", &body).await.map(|_| ())
    }

    pub async fn send_typing(&self, chat_id: i64) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "action": "typing",
        });
        self.call::<bool>("sendChatAction", &body).await.map(|_| ())
    }

    /// Acknowledge a button press so the client stops its loading spinner.
    pub async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(t) = text {
            body["text"] = json!(t);
        }
        self.call::<bool>("answerCallbackQuery", &body).await.map(|_| ())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }

    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.token, file_path
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ParleyError::Telegram(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ParleyError::Telegram(e.to_string()))
    }

    /// Register bot commands with Telegram so they appear in the command menu.
    pub async fn set_my_commands(&self, commands: &[(&str, &str)]) -> Result<()> {
        let cmds: Vec<Value> = commands
            .iter()
            .map(|(cmd, desc)| json!({ "command": cmd, "description": desc }))
            .collect();

        self.call::<bool>("setMyCommands", &json!({ "commands": cmds }))
            .await
            .map(|_| ())
    }
}
