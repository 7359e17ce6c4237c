//! Workflow event log repository.

use crate::db::Database;
use crate::error::{AmeliaError, Result};
use amelia_events::{Event, EventLevel, EventType};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use uuid::Uuid;

/// Repository for the insert-only `workflow_log` table.
#[derive(Clone, Debug)]
pub struct EventRepository {
    db: Database,
}

impl EventRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, event: &Event) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_log
                 (id, workflow_id, sequence, timestamp, level, event_type, agent, message, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.event_id.to_string())
        .bind(event.workflow_id.to_string())
        .bind(event.sequence as i64)
        .bind(event.timestamp.timestamp_millis())
        .bind(event.level.as_str())
        .bind(event.event_type.as_str())
        .bind(&event.agent)
        .bind(&event.message)
        .bind(event.data.as_ref().map(|d| d.to_string()))
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to insert event: {}", e)))?;
        Ok(())
    }

    /// Events for a workflow with `sequence > since`, oldest first.
    pub async fn list_since(&self, workflow_id: Uuid, since: u64) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, sequence, timestamp, level, event_type, agent, message, data
             FROM workflow_log
             WHERE workflow_id = ? AND sequence > ?
             ORDER BY sequence ASC",
        )
        .bind(workflow_id.to_string())
        .bind(since as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Highest sequence logged for a workflow; 0 when none.
    pub async fn max_sequence(&self, workflow_id: Uuid) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) AS latest FROM workflow_log WHERE workflow_id = ?",
        )
        .bind(workflow_id.to_string())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get::<i64, _>("latest") as u64)
    }

    /// Whether a `stage_completed` for the given node was logged. Used by
    /// restart recovery to replay an emit lost to a crash.
    pub async fn has_stage_completed(&self, workflow_id: Uuid, node: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM workflow_log
             WHERE workflow_id = ? AND event_type = 'stage_completed' AND agent = ?",
        )
        .bind(workflow_id.to_string())
        .bind(node)
        .fetch_one(self.db.pool())
        .await?;
        let count: i64 = row.get("n");
        Ok(count > 0)
    }

    /// Delete log rows older than the cutoff. Returns rows removed.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workflow_log WHERE timestamp < ?")
            .bind(cutoff.timestamp_millis())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let event_id: String = row.get("id");
    let workflow_id: String = row.get("workflow_id");
    let level: String = row.get("level");
    let event_type: String = row.get("event_type");
    let data: Option<String> = row.get("data");

    let event_type = serde_json::from_value::<EventType>(serde_json::Value::String(
        event_type.clone(),
    ))
    .map_err(|_| AmeliaError::Database(format!("unknown event type {}", event_type)))?;

    Ok(Event {
        event_id: Uuid::parse_str(&event_id)
            .map_err(|e| AmeliaError::Database(format!("bad event id: {}", e)))?,
        workflow_id: Uuid::parse_str(&workflow_id)
            .map_err(|e| AmeliaError::Database(format!("bad workflow id: {}", e)))?,
        sequence: row.get::<i64, _>("sequence") as u64,
        timestamp: Utc
            .timestamp_millis_opt(row.get("timestamp"))
            .single()
            .unwrap_or_else(Utc::now),
        level: EventLevel::from(level.as_str()),
        agent: row.get("agent"),
        event_type,
        message: row.get("message"),
        data: data.and_then(|d| serde_json::from_str(&d).ok()),
        trace_id: None,
        parent_id: None,
    })
}
