use std::sync::Arc;
use std::time::Duration;

use parley_agent::{AgentOutcome, InvokeOptions};
use parley_core::error::{ParleyError, Result};
use parley_core::types::{preview, ChatId, UserId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::Controller;
use crate::delivery::footer;
use crate::progress::{format_eta, ProgressNotifier, ProgressSettings, TypingHeartbeat};
use crate::state::Admission;
use crate::transport::{Button, Format};

pub(crate) const BUSY_TEXT: &str =
    "⏳ Your previous request is still processing. Send /cancel to stop it.";
pub(crate) const CANCELLED_TEXT: &str = "🛑 Request cancelled.";
pub(crate) const FAILURE_TEXT: &str = "❌ Something went wrong. Please try again.";
const NO_OUTPUT_TEXT: &str = "(no output)";
const PREVIEW_CHARS: usize = 100;

/// How a submitted request ended, as far as the caller cares.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Another request for the user was running; nothing was dispatched.
    Busy,
    /// `retried` is set when the resumed session failed and a fresh one answered.
    Succeeded { outcome: AgentOutcome, retried: bool },
    Cancelled,
    Failed,
}

/// Result of the agent phase, before anything is shown to the user.
enum Dispatch {
    Completed { outcome: AgentOutcome, retried: bool },
    Cancelled,
    Failed(String),
}

impl Controller {
    /// Run one prompt through the full lifecycle for `user_id`.
    pub async fn submit(&self, user_id: UserId, chat_id: ChatId, prompt: String) -> RequestOutcome {
        match self.admit(user_id, chat_id).await {
            Some(admission) => self.run_admitted(admission, chat_id, prompt).await,
            None => RequestOutcome::Busy,
        }
    }

    /// Take the user's in-flight slot, or tell them to wait.
    pub(crate) async fn admit(&self, user_id: UserId, chat_id: ChatId) -> Option<Admission> {
        let admission = self.sessions.try_begin(user_id);
        if admission.is_none() {
            info!(user_id, "request rejected, previous one still running");
            let _ = self
                .transport
                .send(chat_id, BUSY_TEXT, Format::Plain, &[])
                .await;
        }
        admission
    }

    /// The lifecycle after admission. The slot is released on return.
    pub(crate) async fn run_admitted(
        &self,
        admission: Admission,
        chat_id: ChatId,
        prompt: String,
    ) -> RequestOutcome {
        let user_id = admission.user_id();
        self.sessions.update(user_id, |s| {
            s.last_prompt = Some(prompt.clone());
            s.last_chat = Some(chat_id);
        });

        let cancel = admission.token().clone();
        let mut typing = TypingHeartbeat::start(
            Arc::clone(&self.transport),
            chat_id,
            self.settings.typing_interval,
        );
        let mut progress = ProgressNotifier::start(
            Arc::clone(&self.transport),
            chat_id,
            format_eta(self.timings.mean()),
            ProgressSettings {
                ack_delay: self.settings.ack_delay,
                update_interval: self.settings.progress_interval,
            },
        );

        let started = Instant::now();
        let dispatched = self.dispatch(user_id, &prompt, &cancel).await;
        let elapsed = started.elapsed();

        progress.stop().await;
        typing.stop().await;

        let outcome = match dispatched {
            Dispatch::Completed { outcome, retried } => {
                self.succeed(user_id, chat_id, &prompt, outcome, retried, elapsed, &cancel)
                    .await
            }
            Dispatch::Cancelled => self.report_cancelled(user_id, chat_id).await,
            Dispatch::Failed(detail) => {
                error!(user_id, chat_id, detail = %detail, "request failed");
                let _ = self
                    .transport
                    .send(chat_id, FAILURE_TEXT, Format::Plain, &[])
                    .await;
                RequestOutcome::Failed
            }
        };

        drop(admission);
        outcome
    }

    /// Resume handle for the next call: the in-memory one, else the store's
    /// latest fresh session unless the user asked for a clean slate.
    async fn resolve_resume(&self, user_id: UserId) -> Option<String> {
        let state = self.sessions.get(user_id);
        if let Some(id) = state.active_conversation_id {
            return Some(id);
        }
        if !state.resume_from_store {
            return None;
        }
        match self
            .store
            .most_recent_session(user_id, self.settings.session_freshness)
            .await
        {
            Ok(found) => found.filter(|id| !id.is_empty()),
            Err(e) => {
                warn!(user_id, error = %e, "session lookup failed, starting fresh");
                None
            }
        }
    }

    async fn dispatch(&self, user_id: UserId, prompt: &str, cancel: &CancellationToken) -> Dispatch {
        let resume = self.resolve_resume(user_id).await;
        let model = self.sessions.get(user_id).model_preference;
        info!(
            user_id,
            session_id = resume.as_deref().unwrap_or("-"),
            model = model.as_deref().unwrap_or("default"),
            "dispatching request"
        );

        let options = InvokeOptions {
            resume: resume.clone(),
            model: model.clone(),
        };
        let first = match self.invoke(prompt, options, cancel).await {
            Err(ParleyError::Cancelled) => return Dispatch::Cancelled,
            Err(e) => return Dispatch::Failed(e.to_string()),
            Ok(outcome) if !outcome.is_error => {
                return Dispatch::Completed {
                    outcome,
                    retried: false,
                }
            }
            Ok(outcome) => outcome,
        };

        let Some(stale) = resume else {
            return Dispatch::Failed(first.text);
        };
        if cancel.is_cancelled() {
            return Dispatch::Cancelled;
        }

        warn!(
            user_id,
            session_id = %stale,
            detail = %first.text,
            "resumed session failed, retrying with a fresh one"
        );
        self.sessions.update(user_id, |s| {
            if s.active_conversation_id.as_deref() == Some(stale.as_str()) {
                s.active_conversation_id = None;
            }
            s.resume_from_store = false;
        });

        let options = InvokeOptions {
            resume: None,
            model,
        };
        match self.invoke(prompt, options, cancel).await {
            Err(ParleyError::Cancelled) => Dispatch::Cancelled,
            Err(e) => Dispatch::Failed(e.to_string()),
            Ok(outcome) if outcome.is_error => Dispatch::Failed(outcome.text),
            Ok(outcome) => Dispatch::Completed {
                outcome,
                retried: true,
            },
        }
    }

    /// Run the agent on its own task and stop waiting as soon as `cancel` fires.
    /// The abandoned task is left to notice the token by itself.
    async fn invoke(
        &self,
        prompt: &str,
        options: InvokeOptions,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        let agent = Arc::clone(&self.agent);
        let prompt = prompt.to_string();
        let token = cancel.clone();
        let task = tokio::spawn(async move { agent.invoke(&prompt, options, token).await });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ParleyError::Cancelled),
            joined = task => joined
                .unwrap_or_else(|e| Err(ParleyError::Agent(format!("agent task failed: {e}")))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn succeed(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        prompt: &str,
        outcome: AgentOutcome,
        retried: bool,
        elapsed: Duration,
        cancel: &CancellationToken,
    ) -> RequestOutcome {
        let session_id = Some(outcome.session_id.clone()).filter(|id| !id.is_empty());

        // Checked under the registry lock so a /cancel that already ran wins.
        let committed = self.sessions.update(user_id, |s| {
            if cancel.is_cancelled() {
                return false;
            }
            if let Some(id) = &session_id {
                s.active_conversation_id = Some(id.clone());
            }
            s.resume_from_store = true;
            s.cumulative_cost_usd += outcome.cost_usd.max(0.0);
            s.request_count += 1;
            true
        });
        if !committed {
            return self.report_cancelled(user_id, chat_id).await;
        }

        self.timings.record(elapsed);
        info!(
            user_id,
            session_id = session_id.as_deref().unwrap_or("-"),
            elapsed_ms = elapsed.as_millis() as u64,
            cost_usd = outcome.cost_usd,
            retried,
            "request succeeded"
        );

        if let Some(id) = &session_id {
            let prompt_preview = preview(prompt, PREVIEW_CHARS);
            if let Err(e) = self
                .store
                .record_session(id, user_id, &prompt_preview, outcome.cost_usd, outcome.num_turns)
                .await
            {
                warn!(user_id, session_id = %id, error = %e, "failed to record session");
            }
        }

        let text = if outcome.text.trim().is_empty() {
            NO_OUTPUT_TEXT
        } else {
            outcome.text.as_str()
        };
        let duration_ms = if outcome.duration_ms > 0 {
            outcome.duration_ms
        } else {
            elapsed.as_millis() as u64
        };
        let footer = footer(duration_ms, outcome.cost_usd);

        if let Err(e) = self
            .deliver(chat_id, text, footer.as_deref(), &response_buttons())
            .await
        {
            error!(user_id, chat_id, error = %e, "failed to deliver response");
        }

        RequestOutcome::Succeeded { outcome, retried }
    }

    async fn report_cancelled(&self, user_id: UserId, chat_id: ChatId) -> RequestOutcome {
        info!(user_id, "request cancelled");
        let _ = self
            .transport
            .send(chat_id, CANCELLED_TEXT, Format::Plain, &[])
            .await;
        RequestOutcome::Cancelled
    }
}

pub(crate) fn response_buttons() -> Vec<Button> {
    vec![
        Button::new("🔄 Retry", "retry"),
        Button::new("🆕 New session", "new"),
    ]
}
