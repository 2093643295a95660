//! SQLite-backed persistent store.
//!
//! Three JSON-document tables (`sessions`, `learning`, `onboarding`) keyed
//! by user id, plus the `followups` table of scheduled reminder rows.
//! Every caller treats the store as the source of truth: read, modify,
//! write back, never cache across turns.

use chrono::{DateTime, Utc};
use rapport_core::{
    config::MemoryConfig,
    error::EngineError,
    profile::{ConversationProfile, LearningProfile, OnboardingState, Stage},
    shellexpand,
};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Timestamp format stored in the database; lexicographic order matches
/// chronological order.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The JSON-document tables. Table names are fixed at compile time so
/// queries never interpolate caller-supplied identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Sessions,
    Learning,
    Onboarding,
}

impl Table {
    fn as_str(&self) -> &'static str {
        match self {
            Table::Sessions => "sessions",
            Table::Learning => "learning",
            Table::Onboarding => "onboarding",
        }
    }
}

/// A due or pending follow-up row.
#[derive(Debug, Clone)]
pub struct FollowupRow {
    pub id: String,
    pub user_id: String,
    pub stage: Stage,
    pub cycle: u32,
    pub fire_at: DateTime<Utc>,
}

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &MemoryConfig) -> Result<Self, EngineError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Storage(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| EngineError::Storage(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| EngineError::Storage(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// In-memory store for tests and ephemeral runs.
    pub async fn in_memory() -> Result<Self, EngineError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| EngineError::Storage(format!("invalid db path: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| EngineError::Storage(format!("failed to open in-memory sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), EngineError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| EngineError::Storage(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../migrations/001_init.sql")),
            ("002_followups", include_str!("../migrations/002_followups.sql")),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        EngineError::Storage(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| EngineError::Storage(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    EngineError::Storage(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }

    // --- JSON documents ---

    /// Load and deserialize the document for a user, if present.
    pub async fn load<T: DeserializeOwned>(
        &self,
        table: Table,
        user_id: &str,
    ) -> Result<Option<T>, EngineError> {
        let sql = format!("SELECT data FROM {} WHERE user_id = ?", table.as_str());
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("load from {} failed: {e}", table.as_str())))?;

        match row {
            Some((json,)) => {
                let value = serde_json::from_str(&json).map_err(|e| {
                    EngineError::Storage(format!("corrupt document in {}: {e}", table.as_str()))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and upsert the document for a user.
    pub async fn save<T: Serialize>(
        &self,
        table: Table,
        user_id: &str,
        value: &T,
    ) -> Result<(), EngineError> {
        let json = serde_json::to_string(value)
            .map_err(|e| EngineError::Storage(format!("serialize failed: {e}")))?;
        let sql = format!(
            "INSERT INTO {table} (user_id, data, updated_at) VALUES (?, ?, datetime('now')) \
             ON CONFLICT(user_id) DO UPDATE SET data = excluded.data, updated_at = datetime('now')",
            table = table.as_str()
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(&json)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("save to {} failed: {e}", table.as_str())))?;
        Ok(())
    }

    /// Delete the document for a user. Returns whether a row existed.
    pub async fn delete(&self, table: Table, user_id: &str) -> Result<bool, EngineError> {
        let sql = format!("DELETE FROM {} WHERE user_id = ?", table.as_str());
        let result = sqlx::query(&sql)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                EngineError::Storage(format!("delete from {} failed: {e}", table.as_str()))
            })?;
        Ok(result.rows_affected() > 0)
    }

    // --- Typed accessors ---

    pub async fn load_session(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationProfile>, EngineError> {
        self.load(Table::Sessions, user_id).await
    }

    pub async fn save_session(&self, profile: &ConversationProfile) -> Result<(), EngineError> {
        self.save(Table::Sessions, &profile.user_id, profile).await
    }

    pub async fn load_learning(
        &self,
        user_id: &str,
    ) -> Result<Option<LearningProfile>, EngineError> {
        self.load(Table::Learning, user_id).await
    }

    pub async fn save_learning(
        &self,
        user_id: &str,
        profile: &LearningProfile,
    ) -> Result<(), EngineError> {
        self.save(Table::Learning, user_id, profile).await
    }

    pub async fn load_onboarding(
        &self,
        user_id: &str,
    ) -> Result<Option<OnboardingState>, EngineError> {
        self.load(Table::Onboarding, user_id).await
    }

    pub async fn save_onboarding(
        &self,
        user_id: &str,
        state: &OnboardingState,
    ) -> Result<(), EngineError> {
        self.save(Table::Onboarding, user_id, state).await
    }

    // --- Scheduled follow-ups ---

    /// Schedule a follow-up for a user. `fire_at` is re-derived from the
    /// moment of scheduling, never accumulated.
    pub async fn schedule_followup(
        &self,
        user_id: &str,
        stage: Stage,
        cycle: u32,
        scheduled_at: DateTime<Utc>,
        fire_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO followups (id, user_id, stage, cycle, scheduled_at, fire_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(stage.as_str())
        .bind(cycle as i64)
        .bind(scheduled_at.format(TS_FORMAT).to_string())
        .bind(fire_at.format(TS_FORMAT).to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("schedule followup failed: {e}")))?;

        Ok(id)
    }

    /// Pending follow-ups due at or before `now`.
    pub async fn due_followups(&self, now: DateTime<Utc>) -> Result<Vec<FollowupRow>, EngineError> {
        let rows: Vec<(String, String, String, i64, String)> = sqlx::query_as(
            "SELECT id, user_id, stage, cycle, fire_at \
             FROM followups \
             WHERE status = 'pending' AND fire_at <= ? \
             ORDER BY fire_at ASC",
        )
        .bind(now.format(TS_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("get due followups failed: {e}")))?;

        let mut due = Vec::with_capacity(rows.len());
        for (id, user_id, stage, cycle, fire_at) in rows {
            let stage = Stage::parse(&stage)
                .ok_or_else(|| EngineError::Storage(format!("unknown stage in followups: {stage}")))?;
            let fire_at = chrono::NaiveDateTime::parse_from_str(&fire_at, TS_FORMAT)
                .map_err(|e| EngineError::Storage(format!("bad fire_at in followups: {e}")))?
                .and_utc();
            due.push(FollowupRow {
                id,
                user_id,
                stage,
                cycle: cycle as u32,
                fire_at,
            });
        }
        Ok(due)
    }

    /// Mark a follow-up delivered.
    pub async fn complete_followup(&self, id: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE followups SET status = 'delivered' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("complete followup failed: {e}")))?;
        Ok(())
    }

    /// Mark a follow-up stale (stage moved on before it fired).
    pub async fn discard_followup(&self, id: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE followups SET status = 'stale' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("discard followup failed: {e}")))?;
        Ok(())
    }

    /// Cancel every pending follow-up for a user. Returns how many rows
    /// were cancelled.
    pub async fn cancel_followups(&self, user_id: &str) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "UPDATE followups SET status = 'cancelled' \
             WHERE user_id = ? AND status = 'pending'",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("cancel followups failed: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Pending follow-ups for a user, soonest first.
    pub async fn pending_followups(&self, user_id: &str) -> Result<Vec<FollowupRow>, EngineError> {
        let rows: Vec<(String, String, String, i64, String)> = sqlx::query_as(
            "SELECT id, user_id, stage, cycle, fire_at \
             FROM followups \
             WHERE user_id = ? AND status = 'pending' \
             ORDER BY fire_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("get pending followups failed: {e}")))?;

        let mut pending = Vec::with_capacity(rows.len());
        for (id, user_id, stage, cycle, fire_at) in rows {
            let stage = Stage::parse(&stage)
                .ok_or_else(|| EngineError::Storage(format!("unknown stage in followups: {stage}")))?;
            let fire_at = chrono::NaiveDateTime::parse_from_str(&fire_at, TS_FORMAT)
                .map_err(|e| EngineError::Storage(format!("bad fire_at in followups: {e}")))?
                .and_utc();
            pending.push(FollowupRow {
                id,
                user_id,
                stage,
                cycle: cycle as u32,
                fire_at,
            });
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rapport_core::profile::Role;

    async fn test_store() -> Store {
        Store::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_session_document_round_trip() {
        let store = test_store().await;
        let now = Utc::now();

        assert!(store.load_session("u1").await.unwrap().is_none());

        let mut profile = ConversationProfile::new("u1", now);
        profile.append_turn(Role::User, "hello", now, 10);
        profile.note_topic("music");
        store.save_session(&profile).await.unwrap();

        let loaded = store.load_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.topic_interests["music"], 1);

        // Upsert overwrites.
        profile.append_turn(Role::Assistant, "hi!", now, 10);
        store.save_session(&profile).await.unwrap();
        let loaded = store.load_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
    }

    #[tokio::test]
    async fn test_onboarding_and_learning_documents() {
        let store = test_store().await;

        let mut state = OnboardingState::new();
        state.stage = Stage::Welcomed;
        store.save_onboarding("u2", &state).await.unwrap();
        let loaded = store.load_onboarding("u2").await.unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::Welcomed);

        let mut learn = LearningProfile::default();
        learn.decline("group_link_interest");
        store.save_learning("u2", &learn).await.unwrap();
        let loaded = store.load_learning("u2").await.unwrap().unwrap();
        assert_eq!(loaded.preferences["group_link_interest"].count, 1);

        assert!(store.delete(Table::Learning, "u2").await.unwrap());
        assert!(store.load_learning("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_followups_respect_fire_at() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .schedule_followup("u1", Stage::Followup1, 0, now, now + Duration::seconds(120))
            .await
            .unwrap();
        store
            .schedule_followup("u2", Stage::Followup1, 0, now, now + Duration::seconds(600))
            .await
            .unwrap();

        let due = store.due_followups(now).await.unwrap();
        assert!(due.is_empty());

        let due = store.due_followups(now + Duration::seconds(150)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, "u1");
        assert_eq!(due[0].stage, Stage::Followup1);

        store.complete_followup(&due[0].id).await.unwrap();
        let due = store.due_followups(now + Duration::seconds(150)).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_clears_pending_rows() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .schedule_followup("u1", Stage::Followup1, 0, now, now + Duration::seconds(100))
            .await
            .unwrap();
        store
            .schedule_followup("u1", Stage::Followup2, 0, now, now + Duration::seconds(400))
            .await
            .unwrap();

        assert_eq!(store.pending_followups("u1").await.unwrap().len(), 2);
        let cancelled = store.cancel_followups("u1").await.unwrap();
        assert_eq!(cancelled, 2);
        assert!(store.pending_followups("u1").await.unwrap().is_empty());

        // Cancelled rows never come due.
        let due = store.due_followups(now + Duration::seconds(1000)).await.unwrap();
        assert!(due.is_empty());
    }
}
