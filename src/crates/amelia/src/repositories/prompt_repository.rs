//! Prompt storage repository: prompts, versions and per-workflow bindings.

use crate::db::Database;
use crate::error::{AmeliaError, Result};
use crate::prompts::{Prompt, PromptVersion};
use chrono::{TimeZone, Utc};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

/// Repository for the prompt tables.
#[derive(Clone, Debug)]
pub struct PromptRepository {
    db: Database,
}

impl PromptRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a prompt if it does not exist; existing rows keep their
    /// current-version pointer.
    pub async fn upsert_prompt(&self, prompt: &Prompt) -> Result<()> {
        sqlx::query(
            "INSERT INTO prompts (id, agent, name, default_content)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 agent = excluded.agent,
                 name = excluded.name,
                 default_content = excluded.default_content",
        )
        .bind(&prompt.id)
        .bind(&prompt.agent)
        .bind(&prompt.name)
        .bind(&prompt.default_content)
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to upsert prompt: {}", e)))?;
        Ok(())
    }

    pub async fn find_prompt(&self, prompt_id: &str) -> Result<Option<Prompt>> {
        let row = sqlx::query(
            "SELECT id, agent, name, default_content, current_version_id
             FROM prompts WHERE id = ?",
        )
        .bind(prompt_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| Prompt {
            id: row.get("id"),
            agent: row.get("agent"),
            name: row.get("name"),
            default_content: row.get("default_content"),
            current_version_id: row.get("current_version_id"),
        }))
    }

    pub async fn get_version(
        &self,
        prompt_id: &str,
        version_id: &str,
    ) -> Result<Option<PromptVersion>> {
        let row = sqlx::query(
            "SELECT id, prompt_id, version_number, content, created_at, change_note
             FROM prompt_versions WHERE prompt_id = ? AND id = ?",
        )
        .bind(prompt_id)
        .bind(version_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(row_to_version))
    }

    /// Append a new version with the next monotone version number.
    pub async fn insert_version(
        &self,
        prompt_id: &str,
        content: &str,
        change_note: Option<&str>,
    ) -> Result<PromptVersion> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version_number), 0) AS latest
             FROM prompt_versions WHERE prompt_id = ?",
        )
        .bind(prompt_id)
        .fetch_one(self.db.pool())
        .await?;
        let next_number: i64 = row.get::<i64, _>("latest") + 1;

        let version = PromptVersion {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_string(),
            version_number: next_number,
            content: content.to_string(),
            created_at: Utc::now(),
            change_note: change_note.map(String::from),
        };

        sqlx::query(
            "INSERT INTO prompt_versions
                 (id, prompt_id, version_number, content, created_at, change_note)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.id)
        .bind(&version.prompt_id)
        .bind(version.version_number)
        .bind(&version.content)
        .bind(version.created_at.timestamp_millis())
        .bind(&version.change_note)
        .execute(self.db.pool())
        .await
        .map_err(|e| AmeliaError::Database(format!("failed to insert prompt version: {}", e)))?;

        Ok(version)
    }

    pub async fn set_current_version(
        &self,
        prompt_id: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE prompts SET current_version_id = ? WHERE id = ?")
            .bind(version_id)
            .bind(prompt_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Pin a workflow's binding for a prompt id. Idempotent: an existing
    /// binding is never overwritten.
    pub async fn bind(
        &self,
        workflow_id: Uuid,
        prompt_id: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO workflow_prompt_versions (workflow_id, prompt_id, version_id)
             VALUES (?, ?, ?)",
        )
        .bind(workflow_id.to_string())
        .bind(prompt_id)
        .bind(version_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// The pinned binding for one prompt id, if any. The inner `None`
    /// means the default content was pinned.
    pub async fn binding(
        &self,
        workflow_id: Uuid,
        prompt_id: &str,
    ) -> Result<Option<Option<String>>> {
        let row = sqlx::query(
            "SELECT version_id FROM workflow_prompt_versions
             WHERE workflow_id = ? AND prompt_id = ?",
        )
        .bind(workflow_id.to_string())
        .bind(prompt_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| r.get("version_id")))
    }

    /// All bindings for a workflow.
    pub async fn bindings_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<HashMap<String, Option<String>>> {
        let rows = sqlx::query(
            "SELECT prompt_id, version_id FROM workflow_prompt_versions WHERE workflow_id = ?",
        )
        .bind(workflow_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("prompt_id"), r.get("version_id")))
            .collect())
    }
}

fn row_to_version(row: sqlx::sqlite::SqliteRow) -> PromptVersion {
    PromptVersion {
        id: row.get("id"),
        prompt_id: row.get("prompt_id"),
        version_number: row.get("version_number"),
        content: row.get("content"),
        created_at: Utc
            .timestamp_millis_opt(row.get("created_at"))
            .single()
            .unwrap_or_else(Utc::now),
        change_note: row.get("change_note"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> PromptRepository {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        PromptRepository::new(db)
    }

    #[tokio::test]
    async fn version_numbers_are_monotone() {
        let repo = repo().await;
        repo.upsert_prompt(&Prompt::new("architect", "architect", "Plan the work."))
            .await
            .unwrap();

        let v1 = repo.insert_version("architect", "v1 content", None).await.unwrap();
        let v2 = repo
            .insert_version("architect", "v2 content", Some("tightened"))
            .await
            .unwrap();

        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
        assert_eq!(
            repo.get_version("architect", &v2.id).await.unwrap().unwrap().content,
            "v2 content"
        );
    }

    #[tokio::test]
    async fn binding_is_pin_once() {
        let repo = repo().await;
        repo.upsert_prompt(&Prompt::new("architect", "architect", "default"))
            .await
            .unwrap();
        let v1 = repo.insert_version("architect", "v1", None).await.unwrap();

        let wf = Uuid::new_v4();
        repo.bind(wf, "architect", Some(&v1.id)).await.unwrap();
        // A second bind attempt does not overwrite.
        repo.bind(wf, "architect", None).await.unwrap();

        assert_eq!(
            repo.binding(wf, "architect").await.unwrap(),
            Some(Some(v1.id))
        );
    }

    #[tokio::test]
    async fn upsert_preserves_current_pointer() {
        let repo = repo().await;
        repo.upsert_prompt(&Prompt::new("reviewer", "reviewer", "old default"))
            .await
            .unwrap();
        let v1 = repo.insert_version("reviewer", "v1", None).await.unwrap();
        repo.set_current_version("reviewer", Some(&v1.id)).await.unwrap();

        repo.upsert_prompt(&Prompt::new("reviewer", "reviewer", "new default"))
            .await
            .unwrap();

        let prompt = repo.find_prompt("reviewer").await.unwrap().unwrap();
        assert_eq!(prompt.default_content, "new default");
        assert_eq!(prompt.current_version_id, Some(v1.id));
    }
}
