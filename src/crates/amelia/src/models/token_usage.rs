//! Token usage records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One insert-only usage row; aggregations are computed on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub agent: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub timestamp: DateTime<Utc>,
}

impl TokenUsageRecord {
    pub fn new(workflow_id: Uuid, agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            agent: agent.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            num_turns: 0,
            timestamp: Utc::now(),
        }
    }
}
