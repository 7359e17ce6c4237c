//! Reviewer output.

use serde::{Deserialize, Serialize};

/// Reviewer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    RevisionRequested,
}

/// The reviewer's assessment of the changes against the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub status: ReviewStatus,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub comments: Vec<String>,
}

impl ReviewResult {
    pub fn approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }
}
