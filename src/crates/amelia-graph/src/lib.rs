//! Graph runtime for the Amelia orchestration engine.
//!
//! A workflow is a directed graph of nodes over a JSON execution state.
//! This crate provides:
//!
//! - **State merging**: each state field carries a declared merge rule
//!   (`replace` or `append`); transitions are a pure
//!   `StateSchema::merge(old, updates) -> new` ([`state`]).
//! - **Graph description**: nodes (agent / router / approval / noop),
//!   direct and conditional edges, a designated entry node and static
//!   interrupt points ([`graph`]).
//! - **Execution**: [`runtime::GraphRuntime`] advances one node at a
//!   time, checkpointing after every node and pausing at interrupts until
//!   a resume [`command::Command`] arrives. Cancellation is observed at
//!   every suspension point through a `CancellationToken`.
//!
//! Interrupts are modeled as an explicit sentinel outcome
//! ([`node::NodeOutcome::Interrupt`]) returned up through node execution,
//! never as control flow by panic.

pub mod command;
pub mod error;
pub mod graph;
pub mod node;
pub mod runtime;
pub mod state;

pub use command::Command;
pub use error::{GraphError, Result};
pub use graph::{CompiledGraph, Edge, Graph, END};
pub use node::{InterruptDecision, Node, NodeContext, NodeHandler, NodeKind, NodeOutcome};
pub use runtime::{GraphRuntime, Pause, PauseKind, RunFrame, RunOutcome, RunRequest};
pub use state::{AppendReducer, Reducer, ReplaceReducer, StateSchema};
