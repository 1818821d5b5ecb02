use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parley_core::config::AgentConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::preview;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{AgentClient, AgentOutcome, InvokeOptions};

/// Runs prompts through the `claude` CLI in print mode (`-p --output-format json`).
///
/// Each invocation is one child process. Cancelling the token drops the wait,
/// and `kill_on_drop` takes the child down with it.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: String,
    working_dir: String,
    permission_mode: Option<String>,
    max_turns: Option<u32>,
    default_model: Option<String>,
}

/// The final `result` record printed by the CLI.
#[derive(Debug, Deserialize)]
struct ResultRecord {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    num_turns: Option<u32>,
    #[serde(default)]
    is_error: Option<bool>,
    #[serde(default)]
    subtype: Option<String>,
}

impl ClaudeCli {
    pub fn new(binary: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
            permission_mode: None,
            max_turns: None,
            default_model: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            binary: config.binary.clone(),
            working_dir: config.working_dir.clone(),
            permission_mode: non_empty(&config.permission_mode),
            max_turns: (config.max_turns > 0).then_some(config.max_turns),
            default_model: non_empty(&config.default_model),
        }
    }

    fn build_args(&self, prompt: &str, options: &InvokeOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];

        let model = options
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(self.default_model.as_deref());
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }

        if let Some(ref id) = options.resume {
            args.push("--resume".to_string());
            args.push(id.clone());
        }

        if let Some(turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(turns.to_string());
        }

        if let Some(ref mode) = self.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }

        args
    }
}

#[async_trait]
impl AgentClient for ClaudeCli {
    async fn invoke(
        &self,
        prompt: &str,
        options: InvokeOptions,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        if cancel.is_cancelled() {
            return Err(ParleyError::Cancelled);
        }

        let args = self.build_args(prompt, &options);
        debug!(
            binary = %self.binary,
            resume = options.resume.as_deref().unwrap_or("-"),
            "spawning agent"
        );

        let started = Instant::now();
        let child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ParleyError::Agent(format!("failed to start {}: {e}", self.binary)))?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ParleyError::Cancelled),
            out = child.wait_with_output() => {
                out.map_err(|e| ParleyError::Agent(format!("agent process failed: {e}")))?
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_output(&stdout, &stderr, output.status.success(), started.elapsed())
    }
}

/// Turn the CLI's stdout into an outcome.
///
/// Accepts either a single result object or an array of stream records (older
/// CLI versions). A process that failed without printing a result is reported
/// as an errored outcome so the caller can still decide whether to retry.
fn parse_output(stdout: &str, stderr: &str, success: bool, elapsed: Duration) -> Result<AgentOutcome> {
    match find_result_record(stdout) {
        Some(record) => {
            let is_error = record.is_error.unwrap_or(false)
                || record.subtype.as_deref().is_some_and(|s| s != "success");
            let text = match record.result {
                Some(text) => text,
                None if is_error => record.subtype.unwrap_or_else(|| "error".to_string()),
                None => String::new(),
            };
            Ok(AgentOutcome {
                text,
                session_id: record.session_id.unwrap_or_default(),
                duration_ms: record
                    .duration_ms
                    .unwrap_or_else(|| elapsed.as_millis() as u64),
                cost_usd: record.total_cost_usd.unwrap_or(0.0),
                num_turns: record.num_turns.unwrap_or(0),
                is_error,
            })
        }
        None if success => Err(ParleyError::Agent(format!(
            "unparseable agent output: {}",
            preview(stdout.trim(), 200)
        ))),
        None => {
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            warn!(detail = %preview(detail, 300), "agent exited with failure");
            Ok(AgentOutcome {
                text: detail.to_string(),
                duration_ms: elapsed.as_millis() as u64,
                is_error: true,
                ..Default::default()
            })
        }
    }
}

fn find_result_record(stdout: &str) -> Option<ResultRecord> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_str(trimmed).ok().or_else(|| {
        // stream-json style: one record per line, result last.
        trimmed
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
    })?;

    let record = match value {
        Value::Array(items) => items
            .into_iter()
            .rev()
            .find(|v| v.get("type").and_then(Value::as_str) == Some("result"))?,
        other => other,
    };

    serde_json::from_value(record).ok()
}
