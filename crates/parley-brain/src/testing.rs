//! In-memory stand-ins for the controller's collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use parley_agent::{AgentClient, AgentOutcome, InvokeOptions};
use parley_core::error::{ParleyError, Result};
use parley_core::types::{ChatId, MessageId, UserId};
use tokio_util::sync::CancellationToken;

use crate::store::SessionStore;
use crate::transport::{Button, Format, Transport};

/// A send attempt, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct SendAttempt {
    pub chat_id: ChatId,
    pub text: String,
    pub format: Format,
    pub buttons: Vec<Button>,
    pub delivered: bool,
}

/// Operations that reached the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Send {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
    },
    Answer {
        callback_id: String,
    },
}

#[derive(Default)]
pub struct MockTransport {
    outbound: Mutex<Vec<Outbound>>,
    attempts: Mutex<Vec<SendAttempt>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    typing: AtomicUsize,
    downloads: AtomicUsize,
    next_id: AtomicI64,
    reject_rich: AtomicBool,
    fail_sends: AtomicBool,
    fail_edits: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_rich(&self, on: bool) {
        self.reject_rich.store(on, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    pub fn fail_edits(&self, on: bool) {
        self.fail_edits.store(on, Ordering::SeqCst);
    }

    pub fn add_file(&self, file_id: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), bytes.to_vec());
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<SendAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Texts of delivered messages, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.delivered)
            .map(|a| a.text.clone())
            .collect()
    }

    pub fn typing_count(&self) -> usize {
        self.typing.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: Format,
        buttons: &[Button],
    ) -> Result<MessageId> {
        let failure = if self.fail_sends.load(Ordering::SeqCst) {
            Some(ParleyError::Telegram("connection reset".to_string()))
        } else if format == Format::Rich && self.reject_rich.load(Ordering::SeqCst) {
            Some(ParleyError::Http {
                status: 400,
                body: "Bad Request: can't parse entities".to_string(),
            })
        } else {
            None
        };

        self.attempts.lock().unwrap().push(SendAttempt {
            chat_id,
            text: text.to_string(),
            format,
            buttons: buttons.to_vec(),
            delivered: failure.is_none(),
        });
        if let Some(e) = failure {
            return Err(e);
        }

        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.outbound.lock().unwrap().push(Outbound::Send {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(message_id)
    }

    async fn edit(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(ParleyError::Telegram("edit failed".to_string()));
        }
        self.outbound.lock().unwrap().push(Outbound::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.outbound.lock().unwrap().push(Outbound::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn typing(&self, _chat_id: ChatId) -> Result<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn answer_button(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.outbound.lock().unwrap().push(Outbound::Answer {
            callback_id: callback_id.to_string(),
        });
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| ParleyError::Telegram(format!("no such file: {file_id}")))
    }
}

/// What the scripted agent does for one call.
pub enum Step {
    Reply(AgentOutcome),
    /// Wait, then reply, honouring cancellation meanwhile.
    Delay(Duration, AgentOutcome),
    /// Wait, then reply, without ever looking at the token.
    Stubborn(Duration, AgentOutcome),
    /// Block until cancelled.
    Hang,
    Fail(ParleyError),
}

pub fn reply(text: &str, session_id: &str, cost_usd: f64) -> AgentOutcome {
    AgentOutcome {
        text: text.to_string(),
        session_id: session_id.to_string(),
        duration_ms: 1_500,
        cost_usd,
        num_turns: 1,
        is_error: false,
    }
}

pub fn error_reply(text: &str) -> AgentOutcome {
    AgentOutcome {
        text: text.to_string(),
        is_error: true,
        ..AgentOutcome::default()
    }
}

#[derive(Default)]
pub struct ScriptedAgent {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, InvokeOptions)>>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, InvokeOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn invoke(
        &self,
        prompt: &str,
        options: InvokeOptions,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), options));
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Reply(reply("ok", "", 0.0)));

        match step {
            Step::Reply(outcome) => Ok(outcome),
            Step::Delay(wait, outcome) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ParleyError::Cancelled),
                    _ = tokio::time::sleep(wait) => Ok(outcome),
                }
            }
            Step::Stubborn(wait, outcome) => {
                tokio::time::sleep(wait).await;
                Ok(outcome)
            }
            Step::Hang => {
                cancel.cancelled().await;
                Err(ParleyError::Cancelled)
            }
            Step::Fail(e) => Err(e),
        }
    }
}

/// One `record_session` call as the store saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub session_id: String,
    pub user_id: UserId,
    pub prompt_preview: String,
    pub cost_usd: f64,
    pub turns: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<RecordedSession>>,
    recent: Mutex<HashMap<UserId, String>>,
    facts: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recent(self, user_id: UserId, session_id: &str) -> Self {
        self.recent
            .lock()
            .unwrap()
            .insert(user_id, session_id.to_string());
        self
    }

    pub fn recorded(&self) -> Vec<RecordedSession> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn record_session(
        &self,
        session_id: &str,
        user_id: UserId,
        prompt_preview: &str,
        cost_usd: f64,
        turns: u32,
    ) -> Result<()> {
        self.sessions.lock().unwrap().push(RecordedSession {
            session_id: session_id.to_string(),
            user_id,
            prompt_preview: prompt_preview.to_string(),
            cost_usd,
            turns,
        });
        self.recent
            .lock()
            .unwrap()
            .insert(user_id, session_id.to_string());
        Ok(())
    }

    async fn most_recent_session(
        &self,
        user_id: UserId,
        _max_age: Duration,
    ) -> Result<Option<String>> {
        Ok(self.recent.lock().unwrap().get(&user_id).cloned())
    }

    async fn get_fact(&self, key: &str) -> Result<Option<String>> {
        Ok(self.facts.lock().unwrap().get(key).cloned())
    }

    async fn set_fact(&self, key: &str, value: &str) -> Result<()> {
        self.facts
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
