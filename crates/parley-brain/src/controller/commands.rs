use std::path::{Path, PathBuf};

use parley_core::error::Result;
use parley_core::types::{new_id, ChatId, UserId};
use tracing::{debug, info, warn};

use super::Controller;
use crate::transport::{Attachment, Format, InboundEvent};

pub(crate) const HELP_TEXT: &str = "Send me a message and I'll pass it to the agent.\n\n\
/new - start a new session\n\
/cancel - stop the running request\n\
/retry - run the last prompt again\n\
/model [name|default] - show or change the model\n\
/status - show your session";

/// Commands advertised to the transport's command menu.
pub const COMMANDS: &[(&str, &str)] = &[
    ("new", "Start a new session"),
    ("cancel", "Stop the running request"),
    ("retry", "Run the last prompt again"),
    ("model", "Show or change the model"),
    ("status", "Show your session"),
    ("help", "How to use this bot"),
];

/// Split `/cmd@bot args` into a lowercase command name and its arguments.
fn parse_command(text: &str) -> Option<(String, &str)> {
    let body = text.trim().strip_prefix('/')?;
    let (head, args) = match body.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (body, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), args))
}

impl Controller {
    /// Entry point for every inbound event. Each call is independent; the
    /// transport is expected to run them on separate tasks.
    pub async fn handle_event(&self, event: InboundEvent) {
        let user_id = event.user_id();
        if !self.is_allowed(user_id) {
            warn!(user_id, chat_id = event.chat_id(), "ignoring unauthorized user");
            return;
        }

        match event {
            InboundEvent::Text {
                user_id,
                chat_id,
                text,
            } => {
                info!(user_id, chat_id, len = text.len(), "received message");
                self.handle_text(user_id, chat_id, text).await;
            }
            InboundEvent::Media {
                user_id,
                chat_id,
                caption,
                attachment,
            } => {
                info!(user_id, chat_id, file = %attachment.file_name, "received attachment");
                self.handle_media(user_id, chat_id, caption, attachment)
                    .await;
            }
            InboundEvent::Button {
                user_id,
                chat_id,
                callback_id,
                action,
            } => {
                let _ = self.transport.answer_button(&callback_id, None).await;
                match action.as_str() {
                    "retry" => self.retry(user_id, chat_id).await,
                    "new" => self.new_session(user_id, chat_id).await,
                    other => debug!(user_id, action = other, "unknown button action"),
                }
            }
        }
    }

    async fn handle_text(&self, user_id: UserId, chat_id: ChatId, text: String) {
        let Some((command, args)) = parse_command(&text) else {
            self.submit(user_id, chat_id, text).await;
            return;
        };

        match command.as_str() {
            "start" | "help" => self.reply(chat_id, HELP_TEXT).await,
            "new" => self.new_session(user_id, chat_id).await,
            "cancel" => self.cancel(user_id, chat_id).await,
            "retry" => self.retry(user_id, chat_id).await,
            "model" => self.model(user_id, chat_id, args).await,
            "status" => self.status(user_id, chat_id).await,
            _ => {
                self.submit(user_id, chat_id, text).await;
            }
        }
    }

    async fn reply(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self
            .transport
            .send(chat_id, text, Format::Plain, &[])
            .await
        {
            warn!(chat_id, error = %e, "failed to send reply");
        }
    }

    async fn new_session(&self, user_id: UserId, chat_id: ChatId) {
        self.sessions.update(user_id, |s| {
            s.active_conversation_id = None;
            s.resume_from_store = false;
        });
        info!(user_id, "session reset");
        self.reply(chat_id, "🆕 Started a new session.").await;
    }

    async fn cancel(&self, user_id: UserId, chat_id: ChatId) {
        if self.sessions.cancel(user_id) {
            info!(user_id, "cancellation requested");
        } else {
            self.reply(chat_id, "Nothing to cancel.").await;
        }
    }

    async fn retry(&self, user_id: UserId, chat_id: ChatId) {
        match self.sessions.get(user_id).last_prompt {
            Some(prompt) => {
                self.submit(user_id, chat_id, prompt).await;
            }
            None => self.reply(chat_id, "Nothing to retry.").await,
        }
    }

    async fn model(&self, user_id: UserId, chat_id: ChatId, args: &str) {
        let text = match args {
            "" => {
                let current = self.sessions.get(user_id).model_preference;
                format!("Model: {}", current.as_deref().unwrap_or("default"))
            }
            "default" => {
                self.sessions.update(user_id, |s| s.model_preference = None);
                "Model reset to default.".to_string()
            }
            name => {
                self.sessions
                    .update(user_id, |s| s.model_preference = Some(name.to_string()));
                format!("Model set to {name}.")
            }
        };
        self.reply(chat_id, &text).await;
    }

    async fn status(&self, user_id: UserId, chat_id: ChatId) {
        let s = self.sessions.get(user_id);
        let text = format!(
            "Session: {}\nModel: {}\nRequests: {}\nCost: ${:.4}\nRunning: {}",
            s.active_conversation_id.as_deref().unwrap_or("none"),
            s.model_preference.as_deref().unwrap_or("default"),
            s.request_count,
            s.cumulative_cost_usd,
            if s.in_flight { "yes" } else { "no" },
        );
        self.reply(chat_id, &text).await;
    }

    /// Attachments are fetched only once the user holds the in-flight slot,
    /// so a busy user gets the rejection before anything is downloaded.
    async fn handle_media(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        caption: Option<String>,
        attachment: Attachment,
    ) {
        let Some(admission) = self.admit(user_id, chat_id).await else {
            return;
        };

        let path = match self.save_attachment(&attachment).await {
            Ok(path) => path,
            Err(e) => {
                warn!(user_id, file_id = %attachment.file_id, error = %e, "failed to save attachment");
                drop(admission);
                self.reply(chat_id, "❌ Could not download the attachment.")
                    .await;
                return;
            }
        };

        let note = format!("[Attached file: {}]", path.display());
        let prompt = match caption.filter(|c| !c.trim().is_empty()) {
            Some(caption) => format!("{caption}\n\n{note}"),
            None => note,
        };
        self.run_admitted(admission, chat_id, prompt).await;
    }

    async fn save_attachment(&self, attachment: &Attachment) -> Result<PathBuf> {
        let bytes = self.transport.download(&attachment.file_id).await?;
        let dir = &self.settings.uploads_dir;
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(format!(
            "{}_{}",
            new_id(),
            sanitize_file_name(&attachment.file_name)
        ));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Last path component with anything outside `[A-Za-z0-9._-]` replaced.
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
