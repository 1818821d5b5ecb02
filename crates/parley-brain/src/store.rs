use std::time::Duration;

use async_trait::async_trait;
use parley_core::error::Result;
use parley_core::types::{now_unix, UserId};
use parley_store::Store;

/// The slice of durable storage the controller relies on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn record_session(
        &self,
        session_id: &str,
        user_id: UserId,
        prompt_preview: &str,
        cost_usd: f64,
        turns: u32,
    ) -> Result<()>;

    /// Id of the user's latest session, if it saw activity within `max_age`.
    async fn most_recent_session(&self, user_id: UserId, max_age: Duration)
        -> Result<Option<String>>;

    async fn get_fact(&self, key: &str) -> Result<Option<String>>;

    async fn set_fact(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl SessionStore for Store {
    async fn record_session(
        &self,
        session_id: &str,
        user_id: UserId,
        prompt_preview: &str,
        cost_usd: f64,
        turns: u32,
    ) -> Result<()> {
        Store::record_session(self, session_id, user_id, prompt_preview, cost_usd, turns).await
    }

    async fn most_recent_session(
        &self,
        user_id: UserId,
        max_age: Duration,
    ) -> Result<Option<String>> {
        let since = now_unix() - max_age.as_secs() as i64;
        let record = Store::most_recent_session(self, user_id, since).await?;
        Ok(record.map(|r| r.session_id))
    }

    async fn get_fact(&self, key: &str) -> Result<Option<String>> {
        Store::get_fact(self, key).await
    }

    async fn set_fact(&self, key: &str, value: &str) -> Result<()> {
        Store::set_fact(self, key, value).await
    }
}
