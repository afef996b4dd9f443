//! Preference persistence (SQLite): per-user message prefixes and
//! per-channel response probabilities.

use crate::ScopeId;
use crate::error::Result;

use anyhow::Context as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use std::path::{Path, PathBuf};

/// Reply probability used when a channel has no stored pair.
pub const DEFAULT_REPLY_PROBABILITY: f64 = 0.1;

/// Reaction probability used when a channel has no stored pair.
pub const DEFAULT_REACTION_PROBABILITY: f64 = 0.2;

/// Per-channel response probabilities. Values stay in [0, 1] by caller
/// convention; the store does not enforce the range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityPair {
    pub reply: f64,
    pub reaction: f64,
}

impl Default for ProbabilityPair {
    fn default() -> Self {
        Self {
            reply: DEFAULT_REPLY_PROBABILITY,
            reaction: DEFAULT_REACTION_PROBABILITY,
        }
    }
}

/// Preference store over a file-backed SQLite database.
#[derive(Clone)]
pub struct PreferenceStore {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl PreferenceStore {
    /// Open (creating if missing) the store at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self {
            pool,
            db_path: Some(path.to_path_buf()),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory store for tests. Snapshots are a no-op.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool, db_path: None };
        store.initialize().await?;
        Ok(store)
    }

    /// Create the preference tables. Idempotent.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id INTEGER PRIMARY KEY,
                message_prefix TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS probabilities (
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                reply_probability REAL NOT NULL DEFAULT 0.1,
                reaction_probability REAL NOT NULL DEFAULT 0.2,
                PRIMARY KEY (guild_id, channel_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a user's message prefix, if any.
    pub async fn prefix(&self, user_id: u64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT message_prefix FROM user_preferences WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| row.try_get("message_prefix").ok()))
    }

    /// Save (or overwrite) a user's message prefix.
    pub async fn set_prefix(&self, user_id: u64, prefix: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_preferences (user_id, message_prefix) VALUES (?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET message_prefix = excluded.message_prefix",
        )
        .bind(user_id as i64)
        .bind(prefix)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the probability pair for a (scope, channel), defaulting when absent.
    pub async fn probabilities(&self, scope: &ScopeId, channel_id: u64) -> Result<ProbabilityPair> {
        let row = sqlx::query(
            "SELECT reply_probability, reaction_probability FROM probabilities \
             WHERE guild_id = ? AND channel_id = ?",
        )
        .bind(scope.to_string())
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => ProbabilityPair {
                reply: row
                    .try_get("reply_probability")
                    .unwrap_or(DEFAULT_REPLY_PROBABILITY),
                reaction: row
                    .try_get("reaction_probability")
                    .unwrap_or(DEFAULT_REACTION_PROBABILITY),
            },
            None => ProbabilityPair::default(),
        })
    }

    /// Partial update: unset fields keep their current value.
    ///
    /// Read-then-write across two store calls; concurrent writers to the same
    /// channel can interleave. Tolerated: probability writes are rare and
    /// single-actor per channel in practice.
    pub async fn set_probabilities(
        &self,
        scope: &ScopeId,
        channel_id: u64,
        reply: Option<f64>,
        reaction: Option<f64>,
    ) -> Result<()> {
        let current = self.probabilities(scope, channel_id).await?;
        let pair = ProbabilityPair {
            reply: reply.unwrap_or(current.reply),
            reaction: reaction.unwrap_or(current.reaction),
        };

        sqlx::query(
            "INSERT INTO probabilities (guild_id, channel_id, reply_probability, reaction_probability) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(guild_id, channel_id) DO UPDATE SET \
                 reply_probability = excluded.reply_probability, \
                 reaction_probability = excluded.reaction_probability",
        )
        .bind(scope.to_string())
        .bind(channel_id.to_string())
        .bind(pair.reply)
        .bind(pair.reaction)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Copy the database file to a `.bak` sibling.
    pub async fn snapshot(&self) -> Result<()> {
        let Some(path) = &self.db_path else {
            return Ok(());
        };
        let mut backup = path.clone().into_os_string();
        backup.push(".bak");
        tokio::fs::copy(path, PathBuf::from(backup))
            .await
            .with_context(|| "failed to copy database to backup")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_roundtrip_and_overwrite() {
        let store = PreferenceStore::open_in_memory().await.unwrap();

        assert_eq!(store.prefix(7).await.unwrap(), None);

        store.set_prefix(7, "MEOW").await.unwrap();
        assert_eq!(store.prefix(7).await.unwrap().as_deref(), Some("MEOW"));

        store.set_prefix(7, "WOOF").await.unwrap();
        assert_eq!(store.prefix(7).await.unwrap().as_deref(), Some("WOOF"));
    }

    #[tokio::test]
    async fn test_probabilities_default_when_absent() {
        let store = PreferenceStore::open_in_memory().await.unwrap();

        let pair = store
            .probabilities(&ScopeId::Guild(1), 100)
            .await
            .unwrap();
        assert_eq!(pair, ProbabilityPair::default());
    }

    #[tokio::test]
    async fn test_partial_probability_updates_keep_other_field() {
        let store = PreferenceStore::open_in_memory().await.unwrap();
        let scope = ScopeId::Guild(1);

        store
            .set_probabilities(&scope, 100, Some(0.5), None)
            .await
            .unwrap();
        let pair = store.probabilities(&scope, 100).await.unwrap();
        assert_eq!(pair.reply, 0.5);
        assert_eq!(pair.reaction, DEFAULT_REACTION_PROBABILITY);

        store
            .set_probabilities(&scope, 100, None, Some(0.9))
            .await
            .unwrap();
        let pair = store.probabilities(&scope, 100).await.unwrap();
        assert_eq!(pair.reply, 0.5);
        assert_eq!(pair.reaction, 0.9);
    }

    #[tokio::test]
    async fn test_scopes_and_channels_are_isolated() {
        let store = PreferenceStore::open_in_memory().await.unwrap();

        store
            .set_probabilities(&ScopeId::Guild(1), 100, Some(1.0), Some(1.0))
            .await
            .unwrap();

        let other_channel = store
            .probabilities(&ScopeId::Guild(1), 101)
            .await
            .unwrap();
        assert_eq!(other_channel, ProbabilityPair::default());

        let dm = store
            .probabilities(&ScopeId::DirectMessage, 100)
            .await
            .unwrap();
        assert_eq!(dm, ProbabilityPair::default());
    }
}
