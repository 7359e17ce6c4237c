//! SQLite database connection and schema bootstrap.
//!
//! The engine persists workflows, the event log, token usage, prompts and
//! prompt bindings here; checkpoints share the same pool through
//! [`amelia_checkpoint::SqliteCheckpointer`]. The partial unique index on
//! `workflows(worktree_path)` enforces per-worktree exclusivity at the
//! storage layer.

use crate::error::{AmeliaError, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Database connection wrapper. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a database file.
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AmeliaError::Database(format!("failed to create database directory: {}", e))
                })?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| AmeliaError::Database("invalid database path".to_string()))?;
        let database_url = format!("sqlite:{}?mode=rwc", path_str);
        debug!(url = %database_url, "connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .map_err(|e| AmeliaError::Database(format!("failed to connect: {}", e)))?;

        info!(path = %path.display(), "database connection established");
        Ok(Self { pool })
    }

    /// Open an in-memory database (tests, embedded runs).
    ///
    /// A single pinned connection keeps the in-memory database alive;
    /// additional connections would each see their own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AmeliaError::Database(format!("failed to connect: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all engine tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS workflows (
                 id              TEXT PRIMARY KEY,
                 issue_id        TEXT NOT NULL,
                 worktree_path   TEXT NOT NULL,
                 status          TEXT NOT NULL,
                 created_at      INTEGER NOT NULL,
                 started_at      INTEGER,
                 completed_at    INTEGER,
                 failure_reason  TEXT,
                 profile_id      TEXT NOT NULL,
                 issue_cache     TEXT,
                 plan_cache      TEXT
             )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_active_worktree
             ON workflows (worktree_path)
             WHERE status IN ('in_progress', 'blocked')",
            "CREATE INDEX IF NOT EXISTS idx_workflows_status
             ON workflows (status, created_at)",
            "CREATE TABLE IF NOT EXISTS workflow_log (
                 id          TEXT PRIMARY KEY,
                 workflow_id TEXT NOT NULL,
                 sequence    INTEGER NOT NULL,
                 timestamp   INTEGER NOT NULL,
                 level       TEXT NOT NULL,
                 event_type  TEXT NOT NULL,
                 agent       TEXT,
                 message     TEXT NOT NULL,
                 data        TEXT,
                 UNIQUE (workflow_id, sequence)
             )",
            "CREATE TABLE IF NOT EXISTS token_usage (
                 id                     TEXT PRIMARY KEY,
                 workflow_id            TEXT NOT NULL,
                 agent                  TEXT NOT NULL,
                 model                  TEXT NOT NULL,
                 input_tokens           INTEGER NOT NULL,
                 output_tokens          INTEGER NOT NULL,
                 cache_read_tokens      INTEGER NOT NULL,
                 cache_creation_tokens  INTEGER NOT NULL,
                 cost_usd               REAL NOT NULL,
                 duration_ms            INTEGER NOT NULL,
                 num_turns              INTEGER NOT NULL,
                 timestamp              INTEGER NOT NULL
             )",
            "CREATE INDEX IF NOT EXISTS idx_token_usage_workflow
             ON token_usage (workflow_id)",
            "CREATE TABLE IF NOT EXISTS prompts (
                 id                 TEXT PRIMARY KEY,
                 agent              TEXT NOT NULL,
                 name               TEXT NOT NULL,
                 default_content    TEXT NOT NULL,
                 current_version_id TEXT
             )",
            "CREATE TABLE IF NOT EXISTS prompt_versions (
                 id             TEXT PRIMARY KEY,
                 prompt_id      TEXT NOT NULL,
                 version_number INTEGER NOT NULL,
                 content        TEXT NOT NULL,
                 created_at     INTEGER NOT NULL,
                 change_note    TEXT,
                 UNIQUE (prompt_id, version_number)
             )",
            "CREATE TABLE IF NOT EXISTS workflow_prompt_versions (
                 workflow_id TEXT NOT NULL,
                 prompt_id   TEXT NOT NULL,
                 version_id  TEXT,
                 PRIMARY KEY (workflow_id, prompt_id)
             )",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
