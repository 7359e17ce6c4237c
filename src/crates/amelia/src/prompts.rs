//! Versioned prompt templates with per-workflow pinning.
//!
//! Each agent's prompt is a [`Prompt`] with an immutable default and an
//! append-only chain of [`PromptVersion`]s. A prompt id resolves through
//! the current-version pointer, unless the workflow already pinned a
//! binding, in which case the pinned content is returned for the rest of
//! the run. Edits to the pointer never affect in-flight workflows.

use crate::error::{AmeliaError, Result};
use crate::repositories::PromptRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A named prompt template with a built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Stable id, e.g. `architect`.
    pub id: String,

    /// Agent this prompt belongs to.
    pub agent: String,

    /// Human-facing name.
    pub name: String,

    /// Content used when no version pointer is set.
    pub default_content: String,

    /// Currently active version, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<String>,
}

impl Prompt {
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        default_content: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            agent: agent.into(),
            default_content: default_content.into(),
            current_version_id: None,
        }
    }
}

/// One immutable revision of a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub prompt_id: String,
    pub version_number: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub change_note: Option<String>,
}

/// Versioned prompt storage.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Register a prompt's default content (idempotent).
    async fn register(&self, prompt: Prompt) -> Result<()>;

    /// The built-in default content.
    async fn get_default(&self, prompt_id: &str) -> Result<String>;

    /// A specific version's content.
    async fn get_version(&self, prompt_id: &str, version_id: &str) -> Result<String>;

    /// The active version id; `None` means the default is active.
    async fn current_version(&self, prompt_id: &str) -> Result<Option<String>>;

    /// Append a new version, make it current, and return its id.
    async fn create_version(
        &self,
        prompt_id: &str,
        content: &str,
        change_note: Option<&str>,
    ) -> Result<String>;

    /// Clear the current pointer back to the default.
    async fn reset(&self, prompt_id: &str) -> Result<()>;

    /// Resolve content for a workflow, pinning the active version on
    /// first use. Later pointer edits never change what this returns for
    /// the same workflow.
    async fn resolve_for_workflow(&self, workflow_id: Uuid, prompt_id: &str) -> Result<String>;

    /// The pinned bindings of a workflow: prompt id → version id
    /// (`None` = default pinned).
    async fn bindings_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<HashMap<String, Option<String>>>;
}

/// SQLite-backed [`PromptStore`].
#[derive(Clone, Debug)]
pub struct SqlitePromptStore {
    repo: PromptRepository,
}

impl SqlitePromptStore {
    pub fn new(repo: PromptRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PromptStore for SqlitePromptStore {
    async fn register(&self, prompt: Prompt) -> Result<()> {
        self.repo.upsert_prompt(&prompt).await
    }

    async fn get_default(&self, prompt_id: &str) -> Result<String> {
        let prompt = self
            .repo
            .find_prompt(prompt_id)
            .await?
            .ok_or_else(|| AmeliaError::NotFound(format!("prompt {}", prompt_id)))?;
        Ok(prompt.default_content)
    }

    async fn get_version(&self, prompt_id: &str, version_id: &str) -> Result<String> {
        let version = self
            .repo
            .get_version(prompt_id, version_id)
            .await?
            .ok_or_else(|| {
                AmeliaError::NotFound(format!("prompt version {}/{}", prompt_id, version_id))
            })?;
        Ok(version.content)
    }

    async fn current_version(&self, prompt_id: &str) -> Result<Option<String>> {
        let prompt = self
            .repo
            .find_prompt(prompt_id)
            .await?
            .ok_or_else(|| AmeliaError::NotFound(format!("prompt {}", prompt_id)))?;
        Ok(prompt.current_version_id)
    }

    async fn create_version(
        &self,
        prompt_id: &str,
        content: &str,
        change_note: Option<&str>,
    ) -> Result<String> {
        // Verify the prompt exists before appending versions to it.
        self.get_default(prompt_id).await?;
        let version = self.repo.insert_version(prompt_id, content, change_note).await?;
        self.repo
            .set_current_version(prompt_id, Some(&version.id))
            .await?;
        Ok(version.id)
    }

    async fn reset(&self, prompt_id: &str) -> Result<()> {
        self.repo.set_current_version(prompt_id, None).await
    }

    async fn resolve_for_workflow(&self, workflow_id: Uuid, prompt_id: &str) -> Result<String> {
        if let Some(binding) = self.repo.binding(workflow_id, prompt_id).await? {
            return match binding {
                Some(version_id) => self.get_version(prompt_id, &version_id).await,
                None => self.get_default(prompt_id).await,
            };
        }

        let current = self.current_version(prompt_id).await?;
        self.repo
            .bind(workflow_id, prompt_id, current.as_deref())
            .await?;
        match current {
            Some(version_id) => self.get_version(prompt_id, &version_id).await,
            None => self.get_default(prompt_id).await,
        }
    }

    async fn bindings_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<HashMap<String, Option<String>>> {
        self.repo.bindings_for_workflow(workflow_id).await
    }
}

/// In-memory [`PromptStore`] for tests and embedded runs.
#[derive(Default)]
pub struct MemoryPromptStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    prompts: HashMap<String, Prompt>,
    versions: HashMap<String, Vec<PromptVersion>>,
    bindings: HashMap<(Uuid, String), Option<String>>,
}

impl MemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptStore for MemoryPromptStore {
    async fn register(&self, prompt: Prompt) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.prompts.entry(prompt.id.clone()).or_insert(prompt.clone());
        entry.default_content = prompt.default_content;
        Ok(())
    }

    async fn get_default(&self, prompt_id: &str) -> Result<String> {
        let inner = self.inner.lock();
        inner
            .prompts
            .get(prompt_id)
            .map(|p| p.default_content.clone())
            .ok_or_else(|| AmeliaError::NotFound(format!("prompt {}", prompt_id)))
    }

    async fn get_version(&self, prompt_id: &str, version_id: &str) -> Result<String> {
        let inner = self.inner.lock();
        inner
            .versions
            .get(prompt_id)
            .and_then(|vs| vs.iter().find(|v| v.id == version_id))
            .map(|v| v.content.clone())
            .ok_or_else(|| {
                AmeliaError::NotFound(format!("prompt version {}/{}", prompt_id, version_id))
            })
    }

    async fn current_version(&self, prompt_id: &str) -> Result<Option<String>> {
        let inner = self.inner.lock();
        inner
            .prompts
            .get(prompt_id)
            .map(|p| p.current_version_id.clone())
            .ok_or_else(|| AmeliaError::NotFound(format!("prompt {}", prompt_id)))
    }

    async fn create_version(
        &self,
        prompt_id: &str,
        content: &str,
        change_note: Option<&str>,
    ) -> Result<String> {
        let mut inner = self.inner.lock();
        if !inner.prompts.contains_key(prompt_id) {
            return Err(AmeliaError::NotFound(format!("prompt {}", prompt_id)));
        }
        let versions = inner.versions.entry(prompt_id.to_string()).or_default();
        let version = PromptVersion {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_string(),
            version_number: versions.len() as i64 + 1,
            content: content.to_string(),
            created_at: Utc::now(),
            change_note: change_note.map(String::from),
        };
        let id = version.id.clone();
        versions.push(version);
        if let Some(prompt) = inner.prompts.get_mut(prompt_id) {
            prompt.current_version_id = Some(id.clone());
        }
        Ok(id)
    }

    async fn reset(&self, prompt_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(prompt) = inner.prompts.get_mut(prompt_id) {
            prompt.current_version_id = None;
        }
        Ok(())
    }

    async fn resolve_for_workflow(&self, workflow_id: Uuid, prompt_id: &str) -> Result<String> {
        let binding = {
            let inner = self.inner.lock();
            inner.bindings.get(&(workflow_id, prompt_id.to_string())).cloned()
        };

        let pinned = match binding {
            Some(pinned) => pinned,
            None => {
                let current = self.current_version(prompt_id).await?;
                let mut inner = self.inner.lock();
                inner
                    .bindings
                    .entry((workflow_id, prompt_id.to_string()))
                    .or_insert_with(|| current.clone())
                    .clone()
            }
        };

        match pinned {
            Some(version_id) => self.get_version(prompt_id, &version_id).await,
            None => self.get_default(prompt_id).await,
        }
    }

    async fn bindings_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<HashMap<String, Option<String>>> {
        let inner = self.inner.lock();
        Ok(inner
            .bindings
            .iter()
            .filter(|((wf, _), _)| *wf == workflow_id)
            .map(|((_, prompt_id), binding)| (prompt_id.clone(), binding.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn sqlite_store() -> SqlitePromptStore {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        SqlitePromptStore::new(PromptRepository::new(db))
    }

    #[tokio::test]
    async fn default_resolution_without_versions() {
        let store = sqlite_store().await;
        store
            .register(Prompt::new("architect", "architect", "default text"))
            .await
            .unwrap();

        assert_eq!(store.current_version("architect").await.unwrap(), None);
        let wf = Uuid::new_v4();
        assert_eq!(
            store.resolve_for_workflow(wf, "architect").await.unwrap(),
            "default text"
        );
        // Default pin recorded.
        assert_eq!(
            store.bindings_for_workflow(wf).await.unwrap().get("architect"),
            Some(&None)
        );
    }

    #[tokio::test]
    async fn binding_pins_across_later_edits() {
        let store = sqlite_store().await;
        store
            .register(Prompt::new("architect", "architect", "default"))
            .await
            .unwrap();
        let v1 = store.create_version("architect", "v1 text", None).await.unwrap();

        let wf = Uuid::new_v4();
        assert_eq!(
            store.resolve_for_workflow(wf, "architect").await.unwrap(),
            "v1 text"
        );

        // Editing the pointer must not affect the in-flight workflow.
        store
            .create_version("architect", "v2 text", Some("rework"))
            .await
            .unwrap();
        assert_eq!(
            store.resolve_for_workflow(wf, "architect").await.unwrap(),
            "v1 text"
        );

        // A fresh workflow sees the new current version.
        let other = Uuid::new_v4();
        assert_eq!(
            store.resolve_for_workflow(other, "architect").await.unwrap(),
            "v2 text"
        );

        let bindings = store.bindings_for_workflow(wf).await.unwrap();
        assert_eq!(bindings.get("architect"), Some(&Some(v1)));
    }

    #[tokio::test]
    async fn reset_returns_to_default_for_new_workflows() {
        let store = sqlite_store().await;
        store
            .register(Prompt::new("reviewer", "reviewer", "default"))
            .await
            .unwrap();
        store.create_version("reviewer", "custom", None).await.unwrap();
        store.reset("reviewer").await.unwrap();

        assert_eq!(store.current_version("reviewer").await.unwrap(), None);
        let wf = Uuid::new_v4();
        assert_eq!(
            store.resolve_for_workflow(wf, "reviewer").await.unwrap(),
            "default"
        );
    }

    #[tokio::test]
    async fn memory_store_matches_contract() {
        let store = MemoryPromptStore::new();
        store
            .register(Prompt::new("developer", "developer", "default"))
            .await
            .unwrap();
        let v1 = store.create_version("developer", "v1", None).await.unwrap();

        let wf = Uuid::new_v4();
        assert_eq!(store.resolve_for_workflow(wf, "developer").await.unwrap(), "v1");
        store.create_version("developer", "v2", None).await.unwrap();
        assert_eq!(store.resolve_for_workflow(wf, "developer").await.unwrap(), "v1");
        assert_eq!(
            store.bindings_for_workflow(wf).await.unwrap().get("developer"),
            Some(&Some(v1))
        );
    }

    #[tokio::test]
    async fn unknown_prompt_is_not_found() {
        let store = sqlite_store().await;
        assert!(matches!(
            store.get_default("ghost").await,
            Err(AmeliaError::NotFound(_))
        ));
    }
}
