//! Checkpointed graph execution.
//!
//! [`GraphRuntime`] advances a workflow one node at a time. After every
//! node it merges the returned updates through the state schema, persists
//! a checkpoint carrying the merged state and the computed next nodes,
//! and only then emits `stage_completed`. Static interrupts pause before
//! a node executes; dynamic interrupts are surfaced by the node itself as
//! [`NodeOutcome::Interrupt`]. A paused run yields
//! [`RunOutcome::Interrupted`] and is re-entered later with a resume
//! [`Command`].
//!
//! Invariants upheld here:
//!
//! - A `stage_completed(N)` event exists only if a checkpoint capturing
//!   the post-`N` state exists (the put happens first).
//! - At the top of the loop a durable checkpoint always reflects the
//!   current state and `next_nodes`, so cancellation can yield without
//!   another write.
//! - Resume values accumulate per node visit and are consumed in order by
//!   the node's `interrupt` calls; they are cleared when the node finally
//!   advances.

use crate::command::Command;
use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::node::{NodeContext, NodeOutcome};
use crate::state::StateSchema;
use amelia_checkpoint::{decode_payload, encode_payload, Checkpoint, Checkpointer};
use amelia_events::{Event, EventSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a run is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseKind {
    /// Static interrupt: paused before the node executed.
    Gate,
    /// Dynamic interrupt: the node paused itself mid-flight.
    Dynamic,
}

/// A recorded pause point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pause {
    pub node: String,
    pub kind: PauseKind,
    pub payload: Value,
}

/// The checkpoint payload body: execution state plus runtime bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFrame {
    /// The merged execution state.
    pub state: Value,

    /// Present while the workflow is paused at an interrupt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<Pause>,

    /// Resume values queued for the current node visit, consumed in order
    /// by the node's interrupt calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resume_values: Vec<Value>,

    /// The last node whose post-state this checkpoint captures. Recovery
    /// uses it to re-emit a `stage_completed` lost to a crash between the
    /// checkpoint write and the emit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_node: Option<String>,
}

impl RunFrame {
    pub fn new(state: Value) -> Self {
        Self {
            state,
            paused: None,
            resume_values: Vec::new(),
            completed_node: None,
        }
    }

    /// Decode a frame from a checkpoint payload.
    pub fn decode(checkpoint: &Checkpoint) -> Result<Self> {
        Ok(decode_payload(&checkpoint.payload)?)
    }

    /// Encode this frame into a checkpoint payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(encode_payload(self)?)
    }
}

/// One entry into the execution loop.
#[derive(Debug)]
pub struct RunRequest {
    pub workflow_id: Uuid,

    /// Resume command for a paused workflow, if any.
    pub command: Option<Command>,

    /// Cancellation flag observed at every suspension point.
    pub cancel: CancellationToken,
}

/// How a run segment ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The graph reached END.
    Completed { state: Value },

    /// Paused at an interrupt awaiting a resume command.
    Interrupted {
        node: String,
        payload: Value,
        state: Value,
    },

    /// The cancel flag was observed; state up to the last checkpoint is
    /// durable.
    Cancelled { state: Value },
}

/// Interprets a compiled graph over checkpointed state.
pub struct GraphRuntime {
    graph: CompiledGraph,
    schema: Arc<StateSchema>,
    checkpointer: Arc<dyn Checkpointer>,
    events: Arc<dyn EventSink>,
}

impl GraphRuntime {
    pub fn new(
        graph: CompiledGraph,
        schema: Arc<StateSchema>,
        checkpointer: Arc<dyn Checkpointer>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            graph,
            schema,
            checkpointer,
            events,
        }
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Persist the initial checkpoint for a new workflow. The first run
    /// segment will start at the graph's entry node.
    pub async fn seed(&self, workflow_id: Uuid, initial_state: Value) -> Result<Checkpoint> {
        let frame = RunFrame::new(initial_state);
        let checkpoint = Checkpoint::new(
            workflow_id.to_string(),
            frame.encode()?,
            vec![self.graph.entry().to_string()],
        );
        self.checkpointer.put(checkpoint.clone()).await?;
        Ok(checkpoint)
    }

    /// The current execution state, from the latest checkpoint.
    pub async fn snapshot(&self, workflow_id: Uuid) -> Result<Value> {
        let thread = workflow_id.to_string();
        let checkpoint = self
            .checkpointer
            .latest(&thread)
            .await?
            .ok_or_else(|| GraphError::MissingCheckpoint(thread))?;
        Ok(RunFrame::decode(&checkpoint)?.state)
    }

    /// Merge an external patch into the latest state and persist a new
    /// checkpoint preserving the pause bookkeeping and `next_nodes`.
    /// Used for manual blocker resolution while a workflow is blocked.
    pub async fn patch_state(&self, workflow_id: Uuid, patch: &Value) -> Result<Value> {
        let thread = workflow_id.to_string();
        let checkpoint = self
            .checkpointer
            .latest(&thread)
            .await?
            .ok_or_else(|| GraphError::MissingCheckpoint(thread.clone()))?;
        let mut frame = RunFrame::decode(&checkpoint)?;
        frame.state = self.schema.merge(&frame.state, patch)?;

        let next = Checkpoint::new(thread, frame.encode()?, checkpoint.next_nodes.clone())
            .with_parent(checkpoint.checkpoint_id);
        self.checkpointer.put(next).await?;
        Ok(frame.state)
    }

    /// Reset execution so the next run segment starts at `node`, clearing
    /// any pause. Used by replan.
    pub async fn reset_to(&self, workflow_id: Uuid, node: &str) -> Result<()> {
        self.graph.node(node)?;
        let thread = workflow_id.to_string();
        let checkpoint = self
            .checkpointer
            .latest(&thread)
            .await?
            .ok_or_else(|| GraphError::MissingCheckpoint(thread.clone()))?;
        let mut frame = RunFrame::decode(&checkpoint)?;
        frame.paused = None;
        frame.resume_values.clear();

        let next = Checkpoint::new(thread, frame.encode()?, vec![node.to_string()])
            .with_parent(checkpoint.checkpoint_id);
        self.checkpointer.put(next).await?;
        Ok(())
    }

    /// Execute nodes until the workflow completes, pauses or is cancelled.
    pub async fn run(&self, req: RunRequest) -> Result<RunOutcome> {
        let workflow_id = req.workflow_id;
        let thread = workflow_id.to_string();

        let checkpoint = self
            .checkpointer
            .latest(&thread)
            .await?
            .ok_or_else(|| GraphError::MissingCheckpoint(thread.clone()))?;
        let mut frame = RunFrame::decode(&checkpoint)?;
        let mut parent_id = checkpoint.checkpoint_id.clone();
        let mut next_nodes = checkpoint.next_nodes.clone();
        let mut command = req.command;

        // Resume handling: a queued command un-pauses the frame; without
        // one a paused workflow stays interrupted (restart recovery path).
        if let Some(pause) = frame.paused.clone() {
            match command.take() {
                Some(cmd) => {
                    frame.resume_values.push(cmd.resume);
                    frame.paused = None;
                }
                None => {
                    return Ok(RunOutcome::Interrupted {
                        node: pause.node,
                        payload: pause.payload,
                        state: frame.state,
                    });
                }
            }
        } else if let Some(cmd) = command.take() {
            warn!(%workflow_id, "resume command supplied but workflow is not paused; ignoring");
            drop(cmd);
        }

        loop {
            let Some(node_id) = next_nodes.first().cloned() else {
                return Ok(RunOutcome::Completed { state: frame.state });
            };

            // Cancellation: the latest checkpoint already reflects this
            // frame, so yielding here needs no further write.
            if req.cancel.is_cancelled() {
                debug!(%workflow_id, node = %node_id, "cancel observed before node");
                return Ok(RunOutcome::Cancelled { state: frame.state });
            }

            // Static interrupt gate: pause before executing the node
            // unless a resume value is queued for it.
            if self.graph.is_static_interrupt(&node_id) && frame.resume_values.is_empty() {
                let payload = serde_json::json!({ "node": node_id });
                frame.paused = Some(Pause {
                    node: node_id.clone(),
                    kind: PauseKind::Gate,
                    payload: payload.clone(),
                });
                let pause_cp =
                    Checkpoint::new(thread.clone(), frame.encode()?, vec![node_id.clone()])
                        .with_parent(parent_id.clone());
                self.checkpointer.put(pause_cp).await?;
                self.events
                    .emit(Event::approval_required(workflow_id, &node_id, payload.clone()))
                    .await;
                return Ok(RunOutcome::Interrupted {
                    node: node_id,
                    payload,
                    state: frame.state,
                });
            }

            // Track the node under execution in the state itself.
            frame.state = self
                .schema
                .merge(&frame.state, &serde_json::json!({ "current_node": node_id }))?;

            self.events
                .emit(Event::stage_started(workflow_id, &node_id))
                .await;

            let node = self.graph.node(&node_id)?.clone();
            let ctx = Arc::new(NodeContext::new(
                workflow_id,
                node_id.clone(),
                frame.resume_values.clone(),
                req.cancel.clone(),
            ));

            let outcome = match node.handler.execute(ctx, frame.state.clone()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Leave a checkpoint pointing back at the failed node
                    // so replan can retry it.
                    let failed_cp =
                        Checkpoint::new(thread.clone(), frame.encode()?, vec![node_id.clone()])
                            .with_parent(parent_id.clone());
                    if let Err(cp_err) = self.checkpointer.put(failed_cp).await {
                        warn!(%workflow_id, error = %cp_err, "failed to persist checkpoint for failed node");
                    }
                    return Err(match err {
                        err @ GraphError::NodeFailed { .. } => err,
                        other => GraphError::node_failed(&node_id, other),
                    });
                }
            };

            match outcome {
                NodeOutcome::Interrupt { updates, payload } => {
                    frame.state = self.schema.merge(&frame.state, &updates)?;
                    frame.paused = Some(Pause {
                        node: node_id.clone(),
                        kind: PauseKind::Dynamic,
                        payload: payload.clone(),
                    });
                    let pause_cp =
                        Checkpoint::new(thread.clone(), frame.encode()?, vec![node_id.clone()])
                            .with_parent(parent_id.clone());
                    self.checkpointer.put(pause_cp).await?;
                    self.events
                        .emit(Event::approval_required(workflow_id, &node_id, payload.clone()))
                        .await;
                    return Ok(RunOutcome::Interrupted {
                        node: node_id,
                        payload,
                        state: frame.state,
                    });
                }
                NodeOutcome::Advance(updates) => {
                    let new_state = self.schema.merge(&frame.state, &updates)?;
                    let next = self.graph.next_after(&node_id, &new_state)?;

                    frame.state = new_state;
                    frame.paused = None;
                    frame.resume_values.clear();
                    frame.completed_node = Some(node_id.clone());

                    let advance_cp =
                        Checkpoint::new(thread.clone(), frame.encode()?, next.clone())
                            .with_parent(parent_id.clone());
                    let advance_id = advance_cp.checkpoint_id.clone();
                    // A put failure fails the node: no stage_completed is
                    // emitted and the caller records the failure.
                    self.checkpointer.put(advance_cp).await?;
                    parent_id = advance_id;

                    self.events
                        .emit(Event::stage_completed(workflow_id, &node_id))
                        .await;

                    next_nodes = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, END};
    use crate::node::{InterruptDecision, Node, NodeHandler, NodeKind};
    use amelia_checkpoint::MemoryCheckpointer;
    use amelia_events::{EventBus, EventType};
    use async_trait::async_trait;
    use serde_json::json;

    struct RecordingSink {
        events: parking_lot::Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn types(&self) -> Vec<EventType> {
            self.events.lock().iter().map(|e| e.event_type).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, event: Event) -> Event {
            self.events.lock().push(event.clone());
            event
        }
    }

    struct SetField {
        field: &'static str,
        value: Value,
    }

    #[async_trait]
    impl NodeHandler for SetField {
        async fn execute(&self, _ctx: Arc<NodeContext>, _state: Value) -> Result<NodeOutcome> {
            Ok(NodeOutcome::Advance(json!({ self.field: self.value })))
        }
    }

    struct GateNode;

    #[async_trait]
    impl NodeHandler for GateNode {
        async fn execute(&self, ctx: Arc<NodeContext>, _state: Value) -> Result<NodeOutcome> {
            match ctx.interrupt(json!({"question": "proceed?"})) {
                InterruptDecision::Resumed(value) => {
                    Ok(NodeOutcome::Advance(json!({ "answer": value })))
                }
                InterruptDecision::Pending(payload) => Ok(NodeOutcome::Interrupt {
                    updates: json!({}),
                    payload,
                }),
            }
        }
    }

    /// Counts work done before the interrupt so re-entry can prove the
    /// recorded prefix is not repeated.
    struct TwoPhase;

    #[async_trait]
    impl NodeHandler for TwoPhase {
        async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
            let phase_one_done = state["phase_one"].as_bool().unwrap_or(false);
            let mut updates = serde_json::Map::new();
            if !phase_one_done {
                updates.insert("phase_one".into(), json!(true));
                updates.insert("phase_one_runs".into(), json!([1]));
            }
            match ctx.interrupt(json!({"awaiting": "go-ahead"})) {
                InterruptDecision::Resumed(value) => {
                    updates.insert("go_ahead".into(), value);
                    Ok(NodeOutcome::Advance(Value::Object(updates)))
                }
                InterruptDecision::Pending(payload) => Ok(NodeOutcome::Interrupt {
                    updates: Value::Object(updates),
                    payload,
                }),
            }
        }
    }

    fn runtime(
        graph: CompiledGraph,
        schema: StateSchema,
    ) -> (GraphRuntime, Arc<MemoryCheckpointer>, Arc<RecordingSink>) {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let sink = RecordingSink::new();
        let runtime = GraphRuntime::new(graph, Arc::new(schema), checkpointer.clone(), sink.clone());
        (runtime, checkpointer, sink)
    }

    fn linear_graph() -> CompiledGraph {
        let mut graph = Graph::new();
        graph.add_node(Node::new("a", NodeKind::Noop, Arc::new(SetField { field: "a_done", value: json!(true) })));
        graph.add_node(Node::new("b", NodeKind::Noop, Arc::new(SetField { field: "b_done", value: json!(true) })));
        graph.set_entry("a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        graph.compile().unwrap()
    }

    fn request(workflow_id: Uuid, command: Option<Command>) -> RunRequest {
        RunRequest {
            workflow_id,
            command,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn linear_run_completes_and_checkpoints_each_node() {
        let (runtime, checkpointer, sink) = runtime(linear_graph(), StateSchema::new());
        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();

        let outcome = runtime.run(request(wf, None)).await.unwrap();
        let RunOutcome::Completed { state } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["a_done"], true);
        assert_eq!(state["b_done"], true);

        // seed + one per node
        assert_eq!(checkpointer.checkpoint_count().await, 3);
        let latest = checkpointer.latest(&wf.to_string()).await.unwrap().unwrap();
        assert!(latest.is_terminal());

        assert_eq!(
            sink.types(),
            vec![
                EventType::StageStarted,
                EventType::StageCompleted,
                EventType::StageStarted,
                EventType::StageCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn run_without_seed_is_missing_checkpoint() {
        let (runtime, _, _) = runtime(linear_graph(), StateSchema::new());
        let err = runtime.run(request(Uuid::new_v4(), None)).await.unwrap_err();
        assert!(matches!(err, GraphError::MissingCheckpoint(_)));
    }

    #[tokio::test]
    async fn static_interrupt_pauses_before_node_and_resumes() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("gate", NodeKind::Approval, Arc::new(GateNode)));
        graph.set_entry("gate");
        graph.add_edge("gate", END);
        graph.add_static_interrupt("gate");
        let (runtime, checkpointer, sink) = runtime(graph.compile().unwrap(), StateSchema::new());

        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();

        let outcome = runtime.run(request(wf, None)).await.unwrap();
        let RunOutcome::Interrupted { node, .. } = outcome else {
            panic!("expected interrupt");
        };
        assert_eq!(node, "gate");
        // The gate pauses before executing: no stage events yet.
        assert_eq!(sink.types(), vec![EventType::ApprovalRequired]);

        let paused = checkpointer.latest(&wf.to_string()).await.unwrap().unwrap();
        assert_eq!(paused.next_nodes, vec!["gate".to_string()]);
        let frame = RunFrame::decode(&paused).unwrap();
        assert!(matches!(frame.paused, Some(Pause { kind: PauseKind::Gate, .. })));

        let outcome = runtime
            .run(request(wf, Some(Command::resume(json!("yes")))))
            .await
            .unwrap();
        let RunOutcome::Completed { state } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["answer"], "yes");
    }

    #[tokio::test]
    async fn paused_run_without_command_stays_interrupted() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("gate", NodeKind::Approval, Arc::new(GateNode)));
        graph.set_entry("gate");
        graph.add_edge("gate", END);
        graph.add_static_interrupt("gate");
        let (runtime, checkpointer, sink) = runtime(graph.compile().unwrap(), StateSchema::new());

        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();
        runtime.run(request(wf, None)).await.unwrap();
        let checkpoints_after_pause = checkpointer.checkpoint_count().await;
        let events_after_pause = sink.types().len();

        // Restart-style re-entry without a command: still interrupted,
        // no duplicate approval_required, no extra checkpoint.
        let outcome = runtime.run(request(wf, None)).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Interrupted { .. }));
        assert_eq!(checkpointer.checkpoint_count().await, checkpoints_after_pause);
        assert_eq!(sink.types().len(), events_after_pause);
    }

    #[tokio::test]
    async fn dynamic_interrupt_persists_prefix_and_skips_it_on_rerun() {
        let mut schema = StateSchema::new();
        schema.add_field("phase_one_runs", Box::new(crate::state::AppendReducer));
        let mut graph = Graph::new();
        graph.add_node(Node::new("work", NodeKind::Agent, Arc::new(TwoPhase)));
        graph.set_entry("work");
        graph.add_edge("work", END);
        let (runtime, checkpointer, _) = runtime(graph.compile().unwrap(), schema);

        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();

        let outcome = runtime.run(request(wf, None)).await.unwrap();
        let RunOutcome::Interrupted { payload, state, .. } = outcome else {
            panic!("expected interrupt");
        };
        assert_eq!(payload["awaiting"], "go-ahead");
        assert_eq!(state["phase_one"], true);

        let paused = checkpointer.latest(&wf.to_string()).await.unwrap().unwrap();
        let frame = RunFrame::decode(&paused).unwrap();
        assert!(matches!(frame.paused, Some(Pause { kind: PauseKind::Dynamic, .. })));

        let outcome = runtime
            .run(request(wf, Some(Command::resume(json!("approved")))))
            .await
            .unwrap();
        let RunOutcome::Completed { state } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["go_ahead"], "approved");
        // The recorded prefix ran exactly once across both entries.
        assert_eq!(state["phase_one_runs"], json!([1]));
    }

    #[tokio::test]
    async fn cancel_before_node_yields_cancelled() {
        let (runtime, _, sink) = runtime(linear_graph(), StateSchema::new());
        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = runtime
            .run(RunRequest {
                workflow_id: wf,
                command: None,
                cancel,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
        assert!(sink.types().is_empty());
    }

    #[tokio::test]
    async fn node_error_leaves_retry_checkpoint() {
        struct Exploding;

        #[async_trait]
        impl NodeHandler for Exploding {
            async fn execute(&self, _ctx: Arc<NodeContext>, _state: Value) -> Result<NodeOutcome> {
                Err(GraphError::node_failed("boom", "driver returned garbage"))
            }
        }

        let mut graph = Graph::new();
        graph.add_node(Node::new("boom", NodeKind::Agent, Arc::new(Exploding)));
        graph.set_entry("boom");
        graph.add_edge("boom", END);
        let (runtime, checkpointer, sink) = runtime(graph.compile().unwrap(), StateSchema::new());

        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();
        let err = runtime.run(request(wf, None)).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeFailed { .. }));

        // stage_started emitted, but no stage_completed for the failure.
        assert_eq!(sink.types(), vec![EventType::StageStarted]);
        let latest = checkpointer.latest(&wf.to_string()).await.unwrap().unwrap();
        assert_eq!(latest.next_nodes, vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn patch_state_merges_and_preserves_next_nodes() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("gate", NodeKind::Approval, Arc::new(GateNode)));
        graph.set_entry("gate");
        graph.add_edge("gate", END);
        graph.add_static_interrupt("gate");
        let (runtime, checkpointer, _) = runtime(graph.compile().unwrap(), StateSchema::new());

        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({"plan": "old"})).await.unwrap();
        runtime.run(request(wf, None)).await.unwrap();

        let state = runtime.patch_state(wf, &json!({"plan": "patched"})).await.unwrap();
        assert_eq!(state["plan"], "patched");

        let latest = checkpointer.latest(&wf.to_string()).await.unwrap().unwrap();
        assert_eq!(latest.next_nodes, vec!["gate".to_string()]);
        let frame = RunFrame::decode(&latest).unwrap();
        assert!(frame.paused.is_some());
        assert_eq!(frame.state["plan"], "patched");
    }

    #[tokio::test]
    async fn reset_to_clears_pause_and_points_at_node() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("gate", NodeKind::Approval, Arc::new(GateNode)));
        graph.add_node(Node::new("a", NodeKind::Noop, Arc::new(SetField { field: "a_done", value: json!(true) })));
        graph.set_entry("a");
        graph.add_edge("a", "gate");
        graph.add_edge("gate", END);
        graph.add_static_interrupt("gate");
        let (runtime, checkpointer, _) = runtime(graph.compile().unwrap(), StateSchema::new());

        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();
        runtime.run(request(wf, None)).await.unwrap();

        runtime.reset_to(wf, "a").await.unwrap();
        let latest = checkpointer.latest(&wf.to_string()).await.unwrap().unwrap();
        assert_eq!(latest.next_nodes, vec!["a".to_string()]);
        assert!(RunFrame::decode(&latest).unwrap().paused.is_none());

        // Re-running goes through "a" again and pauses at the gate.
        let outcome = runtime.run(request(wf, None)).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Interrupted { node, .. } if node == "gate"));
    }

    #[tokio::test]
    async fn events_can_flow_through_a_real_bus() {
        let bus = EventBus::default();
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let runtime = GraphRuntime::new(
            linear_graph(),
            Arc::new(StateSchema::new()),
            checkpointer,
            Arc::new(bus.clone()),
        );
        let wf = Uuid::new_v4();
        runtime.seed(wf, json!({})).await.unwrap();
        runtime.run(request(wf, None)).await.unwrap();
        // Four stage events were sequenced on the bus.
        assert_eq!(bus.last_sequence(wf), Some(4));
    }
}
