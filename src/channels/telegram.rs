//! Telegram channel: long-polls the Bot API for updates.
//!
//! Text, commands and photos arrive through `getUpdates`; replies go out via
//! `sendMessage` with an optional reply keyboard, and photos are downloaded
//! through `getFile` plus the file endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{
    Channel, FileFetcher, IncomingMessage, MessageStream, OutgoingResponse, ReplyMarkup,
};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Pause after a failed poll before asking again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram channel: connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    shutdown: Arc<AtomicBool>,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            api_base: config.api_base.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            client: reqwest::Client::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Send a text message, splitting it if it exceeds Telegram's limit.
    /// The keyboard change rides on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&ReplyMarkup>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { markup } else { None };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    /// Send a single plain-text chunk (≤4096 chars).
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&ReplyMarkup>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = markup {
            body["reply_markup"] = markup_json(markup);
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }

    /// Resolve a `file_id` to the server-side `file_path`.
    async fn resolve_file_path(&self, file_id: &str) -> Result<String, ChannelError> {
        let fetch_err = |reason: String| ChannelError::FetchFailed {
            name: "telegram".into(),
            file_ref: file_id.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|e| fetch_err(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(fetch_err(format!("getFile returned {}", resp.status())));
        }

        let data: Value = resp.json().await.map_err(|e| fetch_err(e.without_url().to_string()))?;
        data.get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| fetch_err("getFile response has no file_path".into()))
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let poll_timeout = self.poll_timeout_secs;
        let client = self.client.clone();
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!("Telegram poll loop shutting down");
                    return;
                }

                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": poll_timeout,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let status = resp.status();
                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(%status, "Telegram parse error: {}", e.without_url());
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                // Bad token (401) or a second poller (409) answer with ok:false.
                let accepted = status.is_success()
                    && data.get("ok").and_then(Value::as_bool) == Some(true);
                let results = match data.get("result").and_then(Value::as_array) {
                    Some(results) if accepted => results,
                    _ => {
                        let description = data
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("no result in response");
                        tracing::warn!(%status, "Telegram getUpdates failed: {description}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ChannelError::InvalidMessage("no chat_id in message metadata".into())
            })?;

        self.send_message(chat_id, &response.content, response.markup.as_ref())
            .await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::HealthCheckFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl FileFetcher for TelegramChannel {
    async fn fetch(&self, file_ref: &str) -> Result<Vec<u8>, ChannelError> {
        let file_path = self.resolve_file_path(file_ref).await?;
        let fetch_err = |reason: String| ChannelError::FetchFailed {
            name: "telegram".into(),
            file_ref: file_ref.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(|e| fetch_err(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(fetch_err(format!("file download returned {}", resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| fetch_err(e.without_url().to_string()))?;

        tracing::debug!(file_ref, size = bytes.len(), "Telegram file downloaded");
        Ok(bytes.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Map one `getUpdates` entry to an [`IncomingMessage`].
///
/// Returns `None` for updates that carry neither text nor a photo.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;

    // Telegram lists photo sizes smallest first; keep the largest.
    let photo = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
        .and_then(|p| p.get("file_id"))
        .and_then(Value::as_str);

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str);

    if photo.is_none() && text.is_none() {
        return None;
    }

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str);
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .or_else(|| username.map(String::from))?;
    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str);

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_else(|| user_id.clone());

    let mut incoming = IncomingMessage::new("telegram", &user_id, text.unwrap_or_default())
        .with_thread(&chat_id)
        .with_metadata(serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }));
    if let Some(name) = first_name.or(username) {
        incoming = incoming.with_user_name(name);
    }
    if let Some(file_id) = photo {
        incoming = incoming.with_photo(file_id);
    }
    if let Some(ts) = message.get("date").and_then(Value::as_i64)
        && let Some(at) = chrono::DateTime::from_timestamp(ts, 0)
    {
        incoming.received_at = at;
    }

    Some(incoming)
}

/// Telegram `reply_markup` object for a keyboard change.
fn markup_json(markup: &ReplyMarkup) -> Value {
    match markup {
        ReplyMarkup::Choices { rows, one_time } => serde_json::json!({
            "keyboard": rows,
            "one_time_keyboard": one_time,
        }),
        ReplyMarkup::Remove => serde_json::json!({ "remove_keyboard": true }),
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts at a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { boundary } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
