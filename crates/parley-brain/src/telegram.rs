//! Telegram as the controller's transport: outbound calls and the long-poll loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::error::Result;
use parley_core::types::{ChatId, MessageId};
use parley_telegram::bot::TelegramBot;
use parley_telegram::format::markdown_to_html;
use parley_telegram::types::{InlineKeyboardButton, InlineKeyboardMarkup, Update};
use tracing::{info, warn};

use crate::controller::{Controller, COMMANDS};
use crate::store::SessionStore;
use crate::transport::{Attachment, Button, Format, InboundEvent, Transport};

const OFFSET_KEY: &str = "telegram_offset";

fn keyboard(buttons: &[Button]) -> Option<InlineKeyboardMarkup> {
    if buttons.is_empty() {
        return None;
    }
    Some(InlineKeyboardMarkup::row(
        buttons
            .iter()
            .map(|b| InlineKeyboardButton {
                text: b.label.clone(),
                callback_data: b.action.clone(),
            })
            .collect(),
    ))
}

#[async_trait]
impl Transport for TelegramBot {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: Format,
        buttons: &[Button],
    ) -> Result<MessageId> {
        let markup = keyboard(buttons);
        match format {
            Format::Rich => {
                self.send_message(chat_id, &markdown_to_html(text), Some("HTML"), markup.as_ref())
                    .await
            }
            Format::Plain => {
                self.send_message(chat_id, text, None, markup.as_ref())
                    .await
            }
        }
    }

    async fn edit(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        self.edit_message(chat_id, message_id, text).await
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.delete_message(chat_id, message_id).await
    }

    async fn typing(&self, chat_id: ChatId) -> Result<()> {
        self.send_typing(chat_id).await
    }

    async fn answer_button(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answer_callback_query(callback_id, text).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.get_file(file_id).await?;
        let path = file.file_path.ok_or_else(|| {
            parley_core::error::ParleyError::Telegram(format!("no file_path for {file_id}"))
        })?;
        self.download_file(&path).await
    }
}

/// Map a raw update to a controller event. Updates without a sender or
/// without anything the controller understands yield `None`.
pub fn event_from_update(update: &Update) -> Option<InboundEvent> {
    if let Some(query) = &update.callback_query {
        return Some(InboundEvent::Button {
            user_id: query.from.id,
            chat_id: query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id),
            callback_id: query.id.clone(),
            action: query.data.clone()?,
        });
    }

    let msg = update.message.as_ref()?;
    let user_id = msg.from.as_ref()?.id;
    let chat_id = msg.chat.id;

    if let Some(doc) = &msg.document {
        return Some(InboundEvent::Media {
            user_id,
            chat_id,
            caption: msg.caption.clone(),
            attachment: Attachment {
                file_id: doc.file_id.clone(),
                file_name: doc
                    .file_name
                    .clone()
                    .unwrap_or_else(|| format!("document_{}", doc.file_id)),
            },
        });
    }

    if let Some(largest) = msg
        .photo
        .as_ref()
        .and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height))
    {
        return Some(InboundEvent::Media {
            user_id,
            chat_id,
            caption: msg.caption.clone(),
            attachment: Attachment {
                file_id: largest.file_id.clone(),
                file_name: format!("photo_{}.jpg", largest.file_id),
            },
        });
    }

    msg.text.as_ref().map(|text| InboundEvent::Text {
        user_id,
        chat_id,
        text: text.clone(),
    })
}

/// Long-poll Telegram forever, handing each event to the controller on its
/// own task. The update offset survives restarts through the store.
pub async fn run_poller(
    controller: Arc<Controller>,
    bot: TelegramBot,
    store: Arc<dyn SessionStore>,
    poll_timeout_secs: u32,
) -> Result<()> {
    if let Err(e) = bot.set_my_commands(COMMANDS).await {
        warn!(error = %e, "failed to register bot commands");
    }

    let mut offset: i64 = store
        .get_fact(OFFSET_KEY)
        .await?
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    info!(offset, "telegram poller started");

    loop {
        let updates = match bot.get_updates(offset, poll_timeout_secs).await {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "error polling updates");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in &updates {
            if update.update_id >= offset {
                offset = update.update_id + 1;
            }

            if let Some(event) = event_from_update(update) {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    controller.handle_event(event).await;
                });
            }
        }

        if !updates.is_empty() {
            if let Err(e) = store.set_fact(OFFSET_KEY, &offset.to_string()).await {
                warn!(error = %e, "failed to persist update offset");
            }
        }
    }
}
