//! Tracker issue model and the tracker contract.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An issue fetched from the tracker, cached on the workflow at submit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    /// Tracker-internal id.
    pub id: String,

    /// Human-facing key, e.g. `PROJ-42`.
    pub key: String,

    pub title: String,
    pub description: String,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Issue {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: key.clone(),
            key,
            title: title.into(),
            description: String::new(),
            labels: Vec::new(),
            url: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Contract for issue trackers. Concrete adapters (Jira, GitHub) live
/// outside the engine; the engine only fetches the issue once at submit.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn fetch_issue(&self, issue_ref: &str) -> Result<Issue>;
}
