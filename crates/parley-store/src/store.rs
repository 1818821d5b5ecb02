use libsql::Database;
use parley_core::error::{ParleyError, Result};
use parley_core::types::now_unix;
use serde::{Deserialize, Serialize};

fn db_err(e: libsql::Error) -> ParleyError {
    ParleyError::Database(e.to_string())
}

/// One row of the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: i64,
    pub prompt_preview: String,
    pub cost_usd: f64,
    pub turns: i64,
    pub created_at: i64,
    pub last_activity_at: i64,
}

/// Durable facts and session log.
///
/// - `facts` is a plain key/value table (poll offset, misc flags).
/// - `sessions` has one row per upstream session; recording the same session
///   again bumps its cost, turn count and activity time.
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (or create) a local database file.
    pub async fn open(path: &str) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        Ok(Self::new(db))
    }

    fn conn(&self) -> Result<libsql::Connection> {
        self.db.connect().map_err(db_err)
    }

    pub async fn init(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS facts (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                prompt_preview TEXT NOT NULL,
                cost_usd REAL NOT NULL DEFAULT 0,
                turns INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS sessions_user_activity ON sessions(user_id, last_activity_at)",
            (),
        )
        .await
        .map_err(db_err)?;

        Ok(())
    }

    pub async fn get_fact(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT value FROM facts WHERE key = ?1",
                libsql::params![key.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    pub async fn set_fact(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO facts (key, value, updated_at) VALUES (?1, ?2, ?3)",
                libsql::params![key.to_string(), value.to_string(), now_unix()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Log one request against a session, adding its cost and agent turns.
    pub async fn record_session(
        &self,
        session_id: &str,
        user_id: i64,
        prompt_preview: &str,
        cost_usd: f64,
        turns: u32,
    ) -> Result<()> {
        self.record_session_at(session_id, user_id, prompt_preview, cost_usd, turns, now_unix())
            .await
    }

    async fn record_session_at(
        &self,
        session_id: &str,
        user_id: i64,
        prompt_preview: &str,
        cost_usd: f64,
        turns: u32,
        now: i64,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO sessions (id, user_id, prompt_preview, cost_usd, turns, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    cost_usd = cost_usd + excluded.cost_usd,
                    turns = turns + excluded.turns,
                    prompt_preview = excluded.prompt_preview,
                    last_activity_at = excluded.last_activity_at",
                libsql::params![
                    session_id.to_string(),
                    user_id,
                    prompt_preview.to_string(),
                    cost_usd,
                    i64::from(turns),
                    now
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// The user's most recently active session, if it was active at or after `since`.
    pub async fn most_recent_session(
        &self,
        user_id: i64,
        since: i64,
    ) -> Result<Option<SessionRecord>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT id, user_id, prompt_preview, cost_usd, turns, created_at, last_activity_at
                 FROM sessions
                 WHERE user_id = ?1 AND last_activity_at >= ?2
                 ORDER BY last_activity_at DESC
                 LIMIT 1",
                libsql::params![user_id, since],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };

        Ok(Some(SessionRecord {
            session_id: row.get::<String>(0).map_err(db_err)?,
            user_id: row.get::<i64>(1).map_err(db_err)?,
            prompt_preview: row.get::<String>(2).map_err(db_err)?,
            cost_usd: row.get::<f64>(3).map_err(db_err)?,
            turns: row.get::<i64>(4).map_err(db_err)?,
            created_at: row.get::<i64>(5).map_err(db_err)?,
            last_activity_at: row.get::<i64>(6).map_err(db_err)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap()).await.unwrap();
        store.init().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_facts_roundtrip_and_overwrite() {
        let (_dir, store) = temp_store().await;
        assert_eq!(store.get_fact("telegram_offset").await.unwrap(), None);

        store.set_fact("telegram_offset", "10").await.unwrap();
        store.set_fact("telegram_offset", "11").await.unwrap();

        assert_eq!(
            store.get_fact("telegram_offset").await.unwrap().as_deref(),
            Some("11")
        );
    }

    #[tokio::test]
    async fn test_record_session_accumulates() {
        let (_dir, store) = temp_store().await;
        store
            .record_session_at("s1", 7, "first", 0.25, 3, 1_000)
            .await
            .unwrap();
        store
            .record_session_at("s1", 7, "second", 0.5, 2, 2_000)
            .await
            .unwrap();

        let rec = store.most_recent_session(7, 0).await.unwrap().unwrap();
        assert_eq!(rec.session_id, "s1");
        assert_eq!(rec.turns, 5);
        assert!((rec.cost_usd - 0.75).abs() < 1e-9);
        assert_eq!(rec.created_at, 1_000);
        assert_eq!(rec.last_activity_at, 2_000);
        assert_eq!(rec.prompt_preview, "second");
    }

    #[tokio::test]
    async fn test_most_recent_picks_latest_activity() {
        let (_dir, store) = temp_store().await;
        store.record_session_at("old", 7, "a", 0.0, 1, 100).await.unwrap();
        store.record_session_at("new", 7, "b", 0.0, 1, 300).await.unwrap();
        store.record_session_at("other", 8, "c", 0.0, 1, 500).await.unwrap();

        let rec = store.most_recent_session(7, 0).await.unwrap().unwrap();
        assert_eq!(rec.session_id, "new");
    }

    #[tokio::test]
    async fn test_stale_sessions_not_offered() {
        let (_dir, store) = temp_store().await;
        store.record_session_at("s1", 7, "a", 0.0, 1, 100).await.unwrap();

        assert!(store.most_recent_session(7, 101).await.unwrap().is_none());
        assert!(store.most_recent_session(7, 100).await.unwrap().is_some());
        assert!(store.most_recent_session(9, 0).await.unwrap().is_none());
    }
}
