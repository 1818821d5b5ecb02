pub mod claude;
pub mod provider;

pub use claude::ClaudeCli;
pub use provider::{AgentClient, AgentOutcome, InvokeOptions};
