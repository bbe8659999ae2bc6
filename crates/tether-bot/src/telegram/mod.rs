use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tether_core::config::Config;
use tracing::warn;

mod types;

pub use types::{CallbackQuery, Message, PhotoSize, TelegramFile, Update};

pub struct TelegramSettings {
    pub bot_token: String,
}

impl TelegramSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .telegram
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var("TETHER_BOT_TOKEN")
                    .ok()
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
            })
            .unwrap_or_default();
        if token.is_empty() {
            bail!("telegram.bot_token or TETHER_BOT_TOKEN is required");
        }

        Ok(Self { bot_token: token })
    }
}

/// A button the user can press under a message.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

const TELEGRAM_PARSE_MODE: &str = "Markdown";

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.telegram.org".to_string(),
            token,
        }
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: Some(vec!["message", "callback_query"]),
        };
        self.post("getUpdates", &request).await
    }

    /// Sends a message, optionally with inline buttons. Returns the sent
    /// message's id so callers can edit it later.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> Result<i64> {
        let request = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id,
            allow_sending_without_reply: Some(true),
            parse_mode: Some(TELEGRAM_PARSE_MODE),
            reply_markup,
        };
        let message: Message = self.post("sendMessage", &request).await?;
        Ok(message.message_id)
    }

    /// Rewrites an existing message, dropping any inline keyboard.
    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
        };
        // Telegram returns the edited Message here; nothing to keep.
        let _: serde_json::Value = self.post("editMessageText", &request).await?;
        Ok(())
    }

    /// Acknowledges a button press so the client stops its spinner.
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<()> {
        let request = AnswerCallbackQueryRequest { callback_query_id };
        let _: serde_json::Value = self.post("answerCallbackQuery", &request).await?;
        Ok(())
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let request = SendChatActionRequest { chat_id, action };
        let _: serde_json::Value = self.post("sendChatAction", &request).await?;
        Ok(())
    }

    /// Keeps the "typing…" indicator alive until the guard is dropped.
    /// Telegram clears the action after ~5 seconds, so it is re-sent on a
    /// shorter interval.
    pub fn start_typing(&self, chat_id: i64) -> TypingGuard {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = client.send_chat_action(chat_id, "typing").await {
                    warn!(chat_id, %err, "typing indicator failed");
                    break;
                }
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        TypingGuard { handle }
    }

    pub async fn send_photo_bytes(
        &self,
        chat_id: i64,
        filename: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/bot{}/sendPhoto", self.base_url, self.token);
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|_| anyhow!("Telegram photo upload failed"))?;
        if !response.status().is_success() {
            bail!(
                "Telegram photo upload failed with status {}",
                response.status()
            );
        }
        Ok(())
    }

    /// Sends a photo Telegram fetches by URL itself.
    pub async fn send_photo_url(&self, chat_id: i64, url: &str) -> Result<()> {
        let request = SendPhotoUrlRequest {
            chat_id,
            photo: url,
        };
        let _: serde_json::Value = self.post("sendPhoto", &request).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<TelegramFile> {
        let request = GetFileRequest { file_id };
        self.post("getFile", &request).await
    }

    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/file/bot{}/{}", self.base_url, self.token, file_path);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|_| anyhow!("Telegram file download failed"))?;

        if !response.status().is_success() {
            bail!(
                "Telegram file download failed with status {}",
                response.status()
            );
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|_| anyhow!("Failed to read Telegram file bytes"))?;
        Ok(bytes.to_vec())
    }

    pub async fn set_my_commands(&self, commands: &[(String, String)]) -> Result<()> {
        let commands: Vec<BotCommandEntry> = commands
            .iter()
            .map(|(command, description)| BotCommandEntry {
                command: command.clone(),
                description: description.clone(),
            })
            .collect();
        let request = SetMyCommandsRequest { commands };
        let _: serde_json::Value = self.post("setMyCommands", &request).await?;
        Ok(())
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, method: &str, body: &B) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|_| anyhow!("Telegram request failed"))?;

        let payload: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|_| anyhow!("Failed to decode Telegram response"))?;

        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| "Telegram API error".to_string());
            bail!("{}", description);
        }

        payload
            .result
            .ok_or_else(|| anyhow!("Telegram response missing result"))
    }
}

/// Aborts the typing loop when dropped.
pub struct TypingGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_updates: Option<Vec<&'static str>>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_sending_without_reply: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
}

#[derive(Debug, Serialize)]
struct SendChatActionRequest<'a> {
    chat_id: i64,
    action: &'a str,
}

#[derive(Debug, Serialize)]
struct GetFileRequest<'a> {
    file_id: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPhotoUrlRequest<'a> {
    chat_id: i64,
    photo: &'a str,
}

#[derive(Debug, Serialize)]
struct SetMyCommandsRequest {
    commands: Vec<BotCommandEntry>,
}

#[derive(Debug, Serialize)]
struct BotCommandEntry {
    command: String,
    description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Message` has no `Default`; the envelope must still decode for it.
    #[test]
    fn response_envelope_decodes_without_default_payloads() {
        let error: TelegramResponse<Message> =
            serde_json::from_str(r#"{"ok":false,"description":"Bad Request"}"#).unwrap();
        assert!(!error.ok);
        assert!(error.result.is_none());
        assert_eq!(error.description.as_deref(), Some("Bad Request"));

        let success: TelegramResponse<Message> = serde_json::from_str(
            r#"{"ok":true,"result":{"message_id":7,"chat":{"id":1,"type":"private"}}}"#,
        )
        .unwrap();
        assert!(success.ok);
        assert_eq!(success.result.unwrap().message_id, 7);
    }

    #[test]
    fn send_message_request_carries_the_parse_mode() {
        let request = SendMessageRequest {
            chat_id: 1,
            text: "hi",
            reply_to_message_id: None,
            allow_sending_without_reply: Some(true),
            parse_mode: Some(TELEGRAM_PARSE_MODE),
            reply_markup: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["parse_mode"], "Markdown");
        // Absent options stay off the wire.
        assert!(value.get("reply_to_message_id").is_none());
    }
}
