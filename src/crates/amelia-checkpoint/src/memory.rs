//! In-memory checkpoint backend.
//!
//! Reference implementation used by tests and embedded runs. Checkpoints
//! are held per thread in write order under an async `RwLock`.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::traits::Checkpointer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory [`Checkpointer`]. Cheap to clone; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointer {
    threads: Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints across all threads.
    pub async fn checkpoint_count(&self) -> usize {
        self.threads.read().await.values().map(Vec::len).sum()
    }

    /// Drop everything. Test helper.
    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut threads = self.threads.write().await;
        let entries = threads.entry(checkpoint.thread_id.clone()).or_default();
        if entries
            .iter()
            .any(|c| c.checkpoint_id == checkpoint.checkpoint_id)
        {
            return Err(CheckpointError::Duplicate {
                thread_id: checkpoint.thread_id,
                checkpoint_id: checkpoint.checkpoint_id,
            });
        }
        entries.push(checkpoint);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|e| e.last().cloned()))
    }

    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|entries| {
            entries
                .iter()
                .find(|c| c.checkpoint_id == checkpoint_id)
                .cloned()
        }))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read().await;
        let mut entries = threads.get(thread_id).cloned().unwrap_or_default();
        entries.reverse();
        Ok(entries)
    }

    async fn purge(&self, thread_ids: &[String], older_than: DateTime<Utc>) -> Result<u64> {
        let mut threads = self.threads.write().await;
        let mut removed = 0u64;
        for thread_id in thread_ids {
            if let Some(entries) = threads.get_mut(thread_id) {
                let before = entries.len();
                entries.retain(|c| c.created_at >= older_than);
                removed += (before - entries.len()) as u64;
                if entries.is_empty() {
                    threads.remove(thread_id);
                }
            }
        }
        Ok(removed)
    }
}
