use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("telegram error: {0}")]
    Telegram(String),
    #[error("http error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("agent error: {0}")]
    Agent(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    Database(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("scheduler error: {0}")]
    Scheduler(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    /// True when the transport rejected the request itself (bad markup, oversized
    /// text) rather than failing to reach it. These are worth one plain-text retry.
    pub fn is_rejected_request(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 400,
            Self::Telegram(msg) => {
                msg.contains("can't parse entities") || msg.contains("message is too long")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
