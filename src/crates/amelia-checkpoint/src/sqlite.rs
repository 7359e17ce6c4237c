//! SQLite checkpoint backend.
//!
//! Stores checkpoints in a `checkpoints` table keyed
//! `PRIMARY KEY (thread_id, checkpoint_id)`; `next_nodes` is a JSON array
//! column. A single `INSERT` per `put` gives the required atomicity.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::traits::Checkpointer;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

/// SQLite-backed [`Checkpointer`].
#[derive(Debug, Clone)]
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// Wrap an existing pool. Call [`Self::init_schema`] once before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the checkpoints table if it does not exist.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                 thread_id     TEXT NOT NULL,
                 checkpoint_id TEXT NOT NULL,
                 parent_id     TEXT,
                 created_at    INTEGER NOT NULL,
                 payload       BLOB NOT NULL,
                 next_nodes    TEXT NOT NULL,
                 PRIMARY KEY (thread_id, checkpoint_id)
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread_created
             ON checkpoints (thread_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint> {
        let next_nodes: String = row.get("next_nodes");
        let created_at_ms: i64 = row.get("created_at");
        let created_at: DateTime<Utc> = Utc
            .timestamp_millis_opt(created_at_ms)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Checkpoint {
            thread_id: row.get("thread_id"),
            checkpoint_id: row.get("checkpoint_id"),
            parent_id: row.get("parent_id"),
            created_at,
            payload: row.get("payload"),
            next_nodes: serde_json::from_str(&next_nodes)?,
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let next_nodes = serde_json::to_string(&checkpoint.next_nodes)?;
        let result = sqlx::query(
            "INSERT INTO checkpoints
                 (thread_id, checkpoint_id, parent_id, created_at, payload, next_nodes)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.thread_id)
        .bind(&checkpoint.checkpoint_id)
        .bind(&checkpoint.parent_id)
        .bind(checkpoint.created_at.timestamp_millis())
        .bind(&checkpoint.payload)
        .bind(&next_nodes)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(
                    thread_id = %checkpoint.thread_id,
                    checkpoint_id = %checkpoint.checkpoint_id,
                    next_nodes = %next_nodes,
                    "checkpoint written"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CheckpointError::Duplicate {
                    thread_id: checkpoint.thread_id,
                    checkpoint_id: checkpoint.checkpoint_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT thread_id, checkpoint_id, parent_id, created_at, payload, next_nodes
             FROM checkpoints
             WHERE thread_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT thread_id, checkpoint_id, parent_id, created_at, payload, next_nodes
             FROM checkpoints
             WHERE thread_id = ? AND checkpoint_id = ?",
        )
        .bind(thread_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT thread_id, checkpoint_id, parent_id, created_at, payload, next_nodes
             FROM checkpoints
             WHERE thread_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn purge(&self, thread_ids: &[String], older_than: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0u64;
        for thread_id in thread_ids {
            let result = sqlx::query(
                "DELETE FROM checkpoints WHERE thread_id = ? AND created_at < ?",
            )
            .bind(thread_id)
            .bind(older_than.timestamp_millis())
            .execute(&self.pool)
            .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteCheckpointer {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteCheckpointer::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn put_get_latest_round_trip() {
        let store = store().await;
        let first = Checkpoint::new("w1", vec![1, 2, 3], vec!["architect".into()]);
        let second = Checkpoint::new("w1", vec![4, 5], vec!["developer".into()])
            .with_parent(first.checkpoint_id.clone());

        store.put(first.clone()).await.unwrap();
        store.put(second.clone()).await.unwrap();

        let fetched = store.get("w1", &first.checkpoint_id).await.unwrap().unwrap();
        assert_eq!(fetched.payload, vec![1, 2, 3]);
        assert_eq!(fetched.next_nodes, vec!["architect".to_string()]);

        let latest = store.latest("w1").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);
        assert_eq!(latest.parent_id.as_deref(), Some(first.checkpoint_id.as_str()));
    }

    #[tokio::test]
    async fn duplicate_is_rejected() {
        let store = store().await;
        let cp = Checkpoint::new("w1", vec![], vec![]);
        store.put(cp.clone()).await.unwrap();
        let err = store.put(cp).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn missing_returns_none() {
        let store = store().await;
        assert!(store.latest("missing").await.unwrap().is_none());
        assert!(store.get("missing", "cp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_newest_first() {
        let store = store().await;
        let ids: Vec<String> = {
            let mut ids = Vec::new();
            for node in ["a", "b", "c"] {
                let cp = Checkpoint::new("w1", vec![], vec![node.to_string()]);
                ids.push(cp.checkpoint_id.clone());
                store.put(cp).await.unwrap();
            }
            ids
        };

        let listed = store.list("w1").await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].checkpoint_id, ids[2]);
        assert_eq!(listed[2].checkpoint_id, ids[0]);
    }

    #[tokio::test]
    async fn purge_respects_cutoff_and_thread_list() {
        let store = store().await;
        store.put(Checkpoint::new("done", vec![], vec![])).await.unwrap();
        store.put(Checkpoint::new("live", vec![], vec!["a".into()])).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let removed = store.purge(&["done".to_string()], cutoff).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.latest("done").await.unwrap().is_none());
        assert!(store.latest("live").await.unwrap().is_some());
    }
}
