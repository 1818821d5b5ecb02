use async_trait::async_trait;
use parley_core::error::Result;
use parley_core::types::{ChatId, MessageId, UserId};

/// How the transport should render outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Markdown rendered with the transport's rich formatting.
    Rich,
    Plain,
}

/// An inline button. `action` comes back verbatim in [`InboundEvent::Button`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// A file attached to an inbound message, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: String,
}

/// Everything the controller can be told by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text {
        user_id: UserId,
        chat_id: ChatId,
        text: String,
    },
    Media {
        user_id: UserId,
        chat_id: ChatId,
        caption: Option<String>,
        attachment: Attachment,
    },
    Button {
        user_id: UserId,
        chat_id: ChatId,
        callback_id: String,
        action: String,
    },
}

impl InboundEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Text { user_id, .. }
            | Self::Media { user_id, .. }
            | Self::Button { user_id, .. } => *user_id,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Text { chat_id, .. }
            | Self::Media { chat_id, .. }
            | Self::Button { chat_id, .. } => *chat_id,
        }
    }
}

/// Outbound operations the controller needs from a chat transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message, returning its id for later edits or deletion.
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: Format,
        buttons: &[Button],
    ) -> Result<MessageId>;

    /// Replace the text of a message previously sent (plain text).
    async fn edit(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()>;

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    /// Show the "typing…" indicator. It expires on its own after a few seconds.
    async fn typing(&self, chat_id: ChatId) -> Result<()>;

    /// Acknowledge a button press.
    async fn answer_button(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Fetch the bytes of an inbound attachment.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}
