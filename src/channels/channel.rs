//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::ChannelError;

/// Stream of inbound messages produced by a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A message received from a user.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Uuid,
    pub channel: String,
    /// Stable identity of the sender.
    pub user_id: String,
    /// Human-readable display name, if the transport provides one.
    pub user_name: Option<String>,
    /// Chat the message was sent in.
    pub thread_id: Option<String>,
    /// Text body (or photo caption).
    pub content: String,
    /// Transport reference to an attached photo.
    pub photo: Option<String>,
    pub received_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(channel: &str, user_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            thread_id: None,
            content: content.to_string(),
            photo: None,
            received_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_user_name(mut self, name: &str) -> Self {
        self.user_name = Some(name.to_string());
        self
    }

    pub fn with_thread(mut self, thread_id: &str) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self
    }

    pub fn with_photo(mut self, file_ref: &str) -> Self {
        self.photo = Some(file_ref.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Display name, falling back to the sender id.
    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.user_id)
    }

    /// Key of the conversation this message belongs to (per chat, per user).
    pub fn session_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.channel,
            self.thread_id.as_deref().unwrap_or("-"),
            self.user_id
        )
    }
}

/// On-screen keyboard change attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMarkup {
    /// Offer a fixed set of choices as reply buttons.
    Choices { rows: Vec<Vec<String>>, one_time: bool },
    /// Remove any previously shown choices.
    Remove,
}

/// A reply sent back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    pub content: String,
    pub markup: Option<ReplyMarkup>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            markup: None,
        }
    }

    pub fn with_markup(mut self, markup: ReplyMarkup) -> Self {
        self.markup = Some(markup);
        self
    }
}

/// A bidirectional message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name, used in session keys and logs.
    fn name(&self) -> &str;

    /// Start receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a reply in the conversation `msg` came from.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError>;
}

/// Downloads a file referenced by an inbound message.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, file_ref: &str) -> Result<Vec<u8>, ChannelError>;
}
