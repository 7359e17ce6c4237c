//! Workflow repository.

use crate::db::Database;
use crate::error::{AmeliaError, Result};
use crate::models::{Workflow, WorkflowStatus};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use uuid::Uuid;

/// Repository for workflow rows.
#[derive(Clone, Debug)]
pub struct WorkflowRepository {
    db: Database,
}

impl WorkflowRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new workflow. The partial unique index rejects a second
    /// active workflow on the same worktree.
    pub async fn insert(&self, workflow: &Workflow) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflows
                 (id, issue_id, worktree_path, status, created_at, started_at,
                  completed_at, failure_reason, profile_id, issue_cache, plan_cache)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.issue_id)
        .bind(&workflow.worktree_path)
        .bind(workflow.status.as_str())
        .bind(workflow.created_at.timestamp_millis())
        .bind(workflow.started_at.map(|t| t.timestamp_millis()))
        .bind(workflow.completed_at.map(|t| t.timestamp_millis()))
        .bind(&workflow.failure_reason)
        .bind(&workflow.profile_id)
        .bind(&workflow.issue_cache)
        .bind(&workflow.plan_cache)
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to insert workflow: {}", e)))?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT id, issue_id, worktree_path, status, created_at, started_at,
                    completed_at, failure_reason, profile_id, issue_cache, plan_cache
             FROM workflows WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| row_to_workflow(&r)).transpose()
    }

    /// The workflow (if any) currently holding the worktree lock.
    pub async fn active_for_worktree(&self, worktree_path: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT id, issue_id, worktree_path, status, created_at, started_at,
                    completed_at, failure_reason, profile_id, issue_cache, plan_cache
             FROM workflows
             WHERE worktree_path = ? AND status IN ('in_progress', 'blocked')",
        )
        .bind(worktree_path)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| row_to_workflow(&r)).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT id, issue_id, worktree_path, status, created_at, started_at,
                    completed_at, failure_reason, profile_id, issue_cache, plan_cache
             FROM workflows ORDER BY created_at DESC",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_workflow).collect()
    }

    pub async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT id, issue_id, worktree_path, status, created_at, started_at,
                    completed_at, failure_reason, profile_id, issue_cache, plan_cache
             FROM workflows WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_workflow).collect()
    }

    /// Transition a workflow's status, stamping the relevant timestamps.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let started_at = if status == WorkflowStatus::InProgress {
            Some(now)
        } else {
            None
        };
        let completed_at = if status.is_terminal() { Some(now) } else { None };

        sqlx::query(
            "UPDATE workflows
             SET status = ?,
                 started_at = COALESCE(started_at, ?),
                 completed_at = COALESCE(?, completed_at),
                 failure_reason = COALESCE(?, failure_reason)
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(failure_reason)
        .bind(id.to_string())
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to update workflow status: {}", e)))?;
        Ok(())
    }

    /// Reopen a workflow for replanning: back to pending with the
    /// terminal bookkeeping cleared. `started_at` is kept so the
    /// lifecycle start event is not repeated.
    pub async fn reopen(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE workflows
             SET status = 'pending', completed_at = NULL, failure_reason = NULL
             WHERE id = ?",
        )
        .bind(id.to_string())
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to reopen workflow: {}", e)))?;
        Ok(())
    }

    /// Cache the architect's plan JSON on the workflow row.
    pub async fn cache_plan(&self, id: Uuid, plan_json: &str) -> Result<()> {
        sqlx::query("UPDATE workflows SET plan_cache = ? WHERE id = ?")
            .bind(plan_json)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Ids of terminal workflows that completed before the cutoff.
    pub async fn terminal_ids_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM workflows
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(cutoff.timestamp_millis())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    Ok(Workflow {
        id: Uuid::parse_str(&id)
            .map_err(|e| AmeliaError::Database(format!("bad workflow id {}: {}", id, e)))?,
        issue_id: row.get("issue_id"),
        worktree_path: row.get("worktree_path"),
        status: WorkflowStatus::from(status.as_str()),
        created_at: millis_to_datetime(row.get("created_at")),
        started_at: row
            .get::<Option<i64>, _>("started_at")
            .map(millis_to_datetime),
        completed_at: row
            .get::<Option<i64>, _>("completed_at")
            .map(millis_to_datetime),
        failure_reason: row.get("failure_reason"),
        profile_id: row.get("profile_id"),
        issue_cache: row.get("issue_cache"),
        plan_cache: row.get("plan_cache"),
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}
