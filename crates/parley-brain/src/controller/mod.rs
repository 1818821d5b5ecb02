//! The per-user session controller.
//!
//! Split across files the same way the handlers are:
//! - `request.rs`: admission, dispatch, stale-session retry, settlement
//! - `commands.rs`: inbound event routing, slash commands, buttons, media

mod commands;
mod request;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_agent::{AgentClient, AgentOutcome, InvokeOptions};
use parley_core::config::Config;
use parley_core::error::Result;
use parley_core::types::{ChatId, UserId};
use tokio_util::sync::CancellationToken;

use crate::delivery;
use crate::progress::TimingHistory;
use crate::state::{SessionRegistry, UserSummary};
use crate::store::SessionStore;
use crate::transport::{Button, Transport};

pub use commands::COMMANDS;
pub use request::RequestOutcome;

/// Tunables, resolved from [`Config`] once at startup.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub ack_delay: Duration,
    pub progress_interval: Duration,
    pub typing_interval: Duration,
    pub timing_history_len: usize,
    /// How old a stored session may be and still be resumed automatically.
    pub session_freshness: Duration,
    pub max_message_len: usize,
    pub uploads_dir: PathBuf,
    pub allowed_users: Vec<UserId>,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        let c = &config.controller;
        Self {
            ack_delay: Duration::from_secs(c.ack_delay_secs),
            progress_interval: Duration::from_secs(c.progress_interval_secs.max(1)),
            typing_interval: Duration::from_secs(c.typing_interval_secs.max(1)),
            timing_history_len: c.timing_history_len,
            session_freshness: Duration::from_secs(c.session_freshness_hours * 3600),
            max_message_len: c.max_message_len,
            uploads_dir: PathBuf::from(&config.agent.uploads_dir),
            allowed_users: config.telegram.allowed_user_ids.clone(),
        }
    }
}

pub struct Controller {
    transport: Arc<dyn Transport>,
    agent: Arc<dyn AgentClient>,
    store: Arc<dyn SessionStore>,
    sessions: Arc<SessionRegistry>,
    timings: TimingHistory,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        transport: Arc<dyn Transport>,
        agent: Arc<dyn AgentClient>,
        store: Arc<dyn SessionStore>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            transport,
            agent,
            store,
            sessions: Arc::new(SessionRegistry::new()),
            timings: TimingHistory::new(settings.timing_history_len),
            settings,
        }
    }

    pub fn summaries(&self) -> Vec<UserSummary> {
        self.sessions.summaries()
    }

    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.settings.allowed_users.contains(&user_id)
    }

    /// One-off agent call outside any user's lifecycle: no admission, no
    /// progress UX and no cancellation.
    pub async fn run_once(&self, prompt: &str, session_id: Option<String>) -> Result<AgentOutcome> {
        let options = InvokeOptions {
            resume: session_id,
            model: None,
        };
        self.agent
            .invoke(prompt, options, CancellationToken::new())
            .await
    }

    /// Send text to a chat, split and with the rich-then-plain fallback.
    pub async fn deliver(
        &self,
        chat_id: ChatId,
        text: &str,
        footer: Option<&str>,
        buttons: &[Button],
    ) -> Result<()> {
        delivery::deliver(
            self.transport.as_ref(),
            chat_id,
            text,
            footer,
            buttons,
            self.settings.max_message_len,
        )
        .await
    }
}
