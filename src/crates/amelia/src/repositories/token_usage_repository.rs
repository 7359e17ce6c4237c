//! Token usage repository.

use crate::db::Database;
use crate::error::{AmeliaError, Result};
use crate::models::TokenUsageRecord;
use chrono::{TimeZone, Utc};
use sqlx::Row;
use uuid::Uuid;

/// Aggregated usage for a workflow, computed on read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub invocations: u64,
}

/// Repository for the insert-only `token_usage` table.
#[derive(Clone, Debug)]
pub struct TokenUsageRepository {
    db: Database,
}

impl TokenUsageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, record: &TokenUsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO token_usage
                 (id, workflow_id, agent, model, input_tokens, output_tokens,
                  cache_read_tokens, cache_creation_tokens, cost_usd, duration_ms,
                  num_turns, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(&record.agent)
        .bind(&record.model)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.cache_read_tokens as i64)
        .bind(record.cache_creation_tokens as i64)
        .bind(record.cost_usd)
        .bind(record.duration_ms as i64)
        .bind(record.num_turns as i64)
        .bind(record.timestamp.timestamp_millis())
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to insert token usage: {}", e)))?;
        Ok(())
    }

    pub async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<TokenUsageRecord>> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, agent, model, input_tokens, output_tokens,
                    cache_read_tokens, cache_creation_tokens, cost_usd, duration_ms,
                    num_turns, timestamp
             FROM token_usage WHERE workflow_id = ? ORDER BY timestamp ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let wf: String = row.get("workflow_id");
                Ok(TokenUsageRecord {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| AmeliaError::Database(format!("bad usage id: {}", e)))?,
                    workflow_id: Uuid::parse_str(&wf)
                        .map_err(|e| AmeliaError::Database(format!("bad workflow id: {}", e)))?,
                    agent: row.get("agent"),
                    model: row.get("model"),
                    input_tokens: row.get::<i64, _>("input_tokens") as u64,
                    output_tokens: row.get::<i64, _>("output_tokens") as u64,
                    cache_read_tokens: row.get::<i64, _>("cache_read_tokens") as u64,
                    cache_creation_tokens: row.get::<i64, _>("cache_creation_tokens") as u64,
                    cost_usd: row.get("cost_usd"),
                    duration_ms: row.get::<i64, _>("duration_ms") as u64,
                    num_turns: row.get::<i64, _>("num_turns") as u32,
                    timestamp: Utc
                        .timestamp_millis_opt(row.get("timestamp"))
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    /// Aggregate usage for a workflow.
    pub async fn summary(&self, workflow_id: Uuid) -> Result<UsageSummary> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(input_tokens), 0) AS input,
                    COALESCE(SUM(output_tokens), 0) AS output,
                    COALESCE(SUM(cost_usd), 0.0) AS cost,
                    COUNT(*) AS n
             FROM token_usage WHERE workflow_id = ?",
        )
        .bind(workflow_id.to_string())
        .fetch_one(self.db.pool())
        .await?;

        Ok(UsageSummary {
            input_tokens: row.get::<i64, _>("input") as u64,
            output_tokens: row.get::<i64, _>("output") as u64,
            cost_usd: row.get("cost"),
            invocations: row.get::<i64, _>("n") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_list_and_summarize() {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        let repo = TokenUsageRepository::new(db);

        let wf = Uuid::new_v4();
        let mut first = TokenUsageRecord::new(wf, "architect", "claude-sonnet");
        first.input_tokens = 1000;
        first.output_tokens = 200;
        first.cost_usd = 0.02;
        let mut second = TokenUsageRecord::new(wf, "developer", "claude-sonnet");
        second.input_tokens = 500;
        second.output_tokens = 100;
        second.cost_usd = 0.01;

        repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();

        let records = repo.list_by_workflow(wf).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agent, "architect");

        let summary = repo.summary(wf).await.unwrap();
        assert_eq!(summary.input_tokens, 1500);
        assert_eq!(summary.output_tokens, 300);
        assert_eq!(summary.invocations, 2);
        assert!((summary.cost_usd - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn summary_of_unknown_workflow_is_zero() {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        let repo = TokenUsageRepository::new(db);
        let summary = repo.summary(Uuid::new_v4()).await.unwrap();
        assert_eq!(summary, UsageSummary::default());
    }
}
