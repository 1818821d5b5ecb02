use async_trait::async_trait;
use parley_core::error::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Per-call knobs for an agent invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOptions {
    /// Upstream session to continue. None starts a fresh conversation.
    pub resume: Option<String>,
    pub model: Option<String>,
}

/// What a finished agent run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub text: String,
    /// Handle for resuming this conversation later. May be empty.
    pub session_id: String,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub num_turns: u32,
    /// The agent ran but reported failure (bad resume handle, turn ceiling, ...).
    pub is_error: bool,
}

/// Something that can run a prompt to completion.
///
/// Implementations must watch `cancel` and return
/// [`ParleyError::Cancelled`](parley_core::error::ParleyError::Cancelled) once
/// they notice it fired. Unexpected failures (cannot start, garbage output) are
/// returned as other errors; a run that completed but reported an error comes
/// back as `Ok` with `is_error` set.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn invoke(
        &self,
        prompt: &str,
        options: InvokeOptions,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome>;
}
