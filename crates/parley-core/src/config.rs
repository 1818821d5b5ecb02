use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ParleyError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    /// Users allowed to talk to the agent. Empty means nobody.
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u32,
}

fn default_poll_timeout() -> u32 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            allowed_user_ids: Vec::new(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default)]
    pub permission_mode: String,
    /// Turn ceiling handed to the agent. 0 leaves it to the agent's default.
    #[serde(default)]
    pub max_turns: u32,
    /// Model used when the user has not picked one with /model.
    #[serde(default)]
    pub default_model: String,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
}

fn default_agent_binary() -> String {
    "claude".to_string()
}

fn default_working_dir() -> String {
    ".".to_string()
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            working_dir: default_working_dir(),
            permission_mode: String::new(),
            max_turns: 0,
            default_model: String::new(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Delay before the "working on it" acknowledgement is posted.
    #[serde(default = "default_ack_delay")]
    pub ack_delay_secs: u64,
    /// Period between in-place edits of the acknowledgement.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
    #[serde(default = "default_typing_interval")]
    pub typing_interval_secs: u64,
    #[serde(default = "default_timing_history_len")]
    pub timing_history_len: usize,
    /// Sessions idle for longer than this are not offered for resume.
    #[serde(default = "default_session_freshness")]
    pub session_freshness_hours: u64,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_ack_delay() -> u64 {
    3
}

fn default_progress_interval() -> u64 {
    60
}

fn default_typing_interval() -> u64 {
    4
}

fn default_timing_history_len() -> usize {
    20
}

fn default_session_freshness() -> u64 {
    24
}

fn default_max_message_len() -> usize {
    4096
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ack_delay_secs: default_ack_delay(),
            progress_interval_secs: default_progress_interval(),
            typing_interval_secs: default_typing_interval(),
            timing_history_len: default_timing_history_len(),
            session_freshness_hours: default_session_freshness(),
            max_message_len: default_max_message_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "parley.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Bearer token required on every request. Empty disables the check.
    #[serde(default)]
    pub api_token: String,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_http_port(),
            api_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// UTC offset in hours used to evaluate cron expressions.
    #[serde(default)]
    pub timezone_offset: i32,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

fn default_check_interval() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone_offset: 0,
            check_interval_secs: default_check_interval(),
            tasks: Vec::new(),
        }
    }
}

/// A prompt that runs on a cron schedule and posts its answer to a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    pub cron: String,
    pub prompt: String,
    pub chat_id: i64,
}

impl Config {
    /// Load config: defaults → parley.toml → env vars (env wins).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ParleyError::Config(format!("failed to read config: {e}")))?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ParleyError::Config(format!("failed to parse config: {e}")))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("PARLEY_TELEGRAM_TOKEN") {
            self.telegram.token = v;
        }
        if let Some(v) = var("PARLEY_ALLOWED_USERS") {
            self.telegram.allowed_user_ids = parse_user_list(&v)?;
        }
        if let Some(v) = var("PARLEY_HTTP_TOKEN") {
            self.http.api_token = v;
        }
        if let Some(v) = var("PARLEY_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = var("PARLEY_CLAUDE_BIN") {
            self.agent.binary = v;
        }
        Ok(())
    }
}

fn parse_user_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| ParleyError::Config(format!("invalid user id '{s}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.binary, "claude");
        assert_eq!(config.controller.ack_delay_secs, 3);
        assert_eq!(config.controller.progress_interval_secs, 60);
        assert_eq!(config.controller.max_message_len, 4096);
        assert!(config.telegram.allowed_user_ids.is_empty());
        assert!(!config.http.enabled);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::parse(
            r#"
            [telegram]
            token = "abc"
            allowed_user_ids = [42]

            [controller]
            ack_delay_secs = 5

            [[scheduler.tasks]]
            name = "briefing"
            cron = "0 8 * * *"
            prompt = "Summarize my day"
            chat_id = 42
            "#,
        )
        .unwrap();

        assert_eq!(config.telegram.token, "abc");
        assert_eq!(config.telegram.allowed_user_ids, vec![42]);
        assert_eq!(config.controller.ack_delay_secs, 5);
        assert_eq!(config.controller.progress_interval_secs, 60);
        assert_eq!(config.scheduler.tasks.len(), 1);
        assert_eq!(config.scheduler.tasks[0].name, "briefing");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse("[telegram]\ntoken = \"from-file\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("PARLEY_TELEGRAM_TOKEN", "from-env"),
            ("PARLEY_ALLOWED_USERS", "1, 2,3"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.telegram.token, "from-env");
        assert_eq!(config.telegram.allowed_user_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_invalid_user_list_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(|k| {
            (k == "PARLEY_ALLOWED_USERS").then(|| "12,abc".to_string())
        });
        assert!(matches!(result, Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::parse("[telegram\ntoken ="),
            Err(ParleyError::Config(_))
        ));
    }
}
