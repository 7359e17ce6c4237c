//! Engine assembly.
//!
//! No module-scope singletons: every component is constructed here and
//! threaded through an [`Engine`] value handed to callers (the HTTP
//! surface, the CLI, tests). The builder picks SQLite-backed components
//! by default and lets tests substitute in-memory stores and a scripted
//! invoker.

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::{AmeliaError, Result};
use crate::events::EventRecorder;
use crate::models::{Profile, Tracker, Workflow};
use crate::pipeline::{
    build_pipeline, register_default_prompts, AgentInvoker, PipelineServices, RegistryInvoker,
};
use crate::prompts::{PromptStore, SqlitePromptStore};
use crate::repositories::{
    EventRepository, PromptRepository, TokenUsageRepository, WorkflowRepository,
};
use crate::scheduler::{OpOutcome, SubmitRequest, WorkflowScheduler};
use crate::state::build_schema;
use amelia_checkpoint::{Checkpoint, Checkpointer, SqliteCheckpointer};
use amelia_drivers::DriverRegistry;
use amelia_events::{EventBus, EventBusConfig, StreamItem, SubscriptionFilter};
use amelia_graph::GraphRuntime;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::Stream;
use uuid::Uuid;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    database_path: Option<PathBuf>,
    profiles: Vec<Profile>,
    trackers: HashMap<String, Arc<dyn Tracker>>,
    drivers: Arc<DriverRegistry>,
    invoker: Option<Arc<dyn AgentInvoker>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            database_path: None,
            profiles: Vec::new(),
            trackers: HashMap::new(),
            drivers: Arc::new(DriverRegistry::new()),
            invoker: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist to a database file; defaults to in-memory.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn with_tracker(mut self, name: impl Into<String>, tracker: Arc<dyn Tracker>) -> Self {
        self.trackers.insert(name.into(), tracker);
        self
    }

    pub fn with_drivers(mut self, drivers: Arc<DriverRegistry>) -> Self {
        self.drivers = drivers;
        self
    }

    /// Substitute the agent invoker (tests use a scripted one).
    pub fn with_invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub async fn build(self) -> Result<Engine> {
        if self.profiles.is_empty() {
            return Err(AmeliaError::Config(
                "at least one profile is required".to_string(),
            ));
        }

        let db = match &self.database_path {
            Some(path) => Database::new(path).await?,
            None => Database::in_memory().await?,
        };
        db.init_schema().await?;

        let checkpointer = SqliteCheckpointer::new(db.pool().clone());
        checkpointer.init_schema().await?;
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(checkpointer);

        let bus = EventBus::new(EventBusConfig {
            ring_capacity: self.config.event_ring_capacity,
            channel_capacity: self.config.event_ring_capacity,
        });
        let event_log = EventRepository::new(db.clone());
        let events = Arc::new(EventRecorder::new(bus.clone(), event_log.clone()));

        let prompts: Arc<dyn PromptStore> =
            Arc::new(SqlitePromptStore::new(PromptRepository::new(db.clone())));
        register_default_prompts(prompts.as_ref()).await?;

        let invoker = self
            .invoker
            .unwrap_or_else(|| Arc::new(RegistryInvoker::new(self.drivers.clone())));

        let services = Arc::new(PipelineServices {
            invoker,
            prompts: prompts.clone(),
            events: events.clone(),
            usage: Some(TokenUsageRepository::new(db.clone())),
            config: self.config.clone(),
        });
        let graph = build_pipeline(services)?;
        let runtime = Arc::new(GraphRuntime::new(
            graph,
            Arc::new(build_schema()),
            checkpointer.clone(),
            events.clone(),
        ));

        let profiles: HashMap<String, Profile> = self
            .profiles
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let scheduler = WorkflowScheduler::new(
            self.config.clone(),
            WorkflowRepository::new(db.clone()),
            events.clone(),
            event_log,
            runtime,
            checkpointer,
            profiles,
            self.trackers,
        );

        Ok(Engine {
            config: self.config,
            usage: TokenUsageRepository::new(db.clone()),
            db,
            bus,
            prompts,
            scheduler,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The orchestration engine root.
pub struct Engine {
    config: EngineConfig,
    db: Database,
    bus: EventBus,
    prompts: Arc<dyn PromptStore>,
    usage: TokenUsageRepository,
    scheduler: WorkflowScheduler,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &WorkflowScheduler {
        &self.scheduler
    }

    pub fn prompts(&self) -> &Arc<dyn PromptStore> {
        &self.prompts
    }

    pub fn usage(&self) -> &TokenUsageRepository {
        &self.usage
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ---- §-level operations, delegated to the scheduler ----

    pub async fn submit(&self, request: SubmitRequest) -> Result<Workflow> {
        self.scheduler.submit(request).await
    }

    pub async fn approve(&self, workflow_id: Uuid, payload: Option<Value>) -> Result<OpOutcome> {
        self.scheduler.approve(workflow_id, payload).await
    }

    pub async fn reject(&self, workflow_id: Uuid, feedback: impl Into<String>) -> Result<OpOutcome> {
        self.scheduler.reject(workflow_id, feedback).await
    }

    pub async fn cancel(&self, workflow_id: Uuid) -> Result<OpOutcome> {
        self.scheduler.cancel(workflow_id).await
    }

    pub async fn update_state(&self, workflow_id: Uuid, patch: Value) -> Result<OpOutcome> {
        self.scheduler.update_state(workflow_id, patch).await
    }

    pub async fn replan(&self, workflow_id: Uuid) -> Result<OpOutcome> {
        self.scheduler.replan(workflow_id).await
    }

    pub async fn snapshot(&self, workflow_id: Uuid) -> Result<Value> {
        self.scheduler.snapshot(workflow_id).await
    }

    pub async fn history(&self, workflow_id: Uuid) -> Result<Vec<Checkpoint>> {
        self.scheduler.history(workflow_id).await
    }

    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        since_sequence: Option<u64>,
    ) -> impl Stream<Item = StreamItem> + Send + 'static {
        self.scheduler.subscribe(filter, since_sequence)
    }

    /// Reconcile persisted workflows after a restart.
    pub async fn recover(&self) -> Result<usize> {
        self.scheduler.recover().await
    }

    /// Apply retention policies to checkpoints and the event log.
    pub async fn purge_retention(&self) -> Result<(u64, u64)> {
        self.scheduler.purge_retention().await
    }
}
