//! Event model and in-process event bus for the Amelia orchestration engine.
//!
//! Every workflow produces an ordered stream of events: lifecycle
//! transitions, stage boundaries, approval gates, artifact changes and
//! driver telemetry. This crate owns the event shape, the per-workflow
//! sequence assignment, and the fan-out bus that delivers events to live
//! subscribers with bounded in-memory backfill.
//!
//! Ordering is guaranteed per workflow only: `(workflow_id, sequence)` is
//! unique and strictly increasing. No ordering exists across workflows.

pub mod bus;
pub mod event;

pub use bus::{Backfill, EventBus, EventBusConfig, StreamItem, SubscriptionFilter};
pub use event::{Event, EventFamily, EventLevel, EventType};

use async_trait::async_trait;

/// Destination for engine-produced events.
///
/// The graph runtime emits through this trait so it stays agnostic of
/// whether events are merely fanned out ([`EventBus`]) or also persisted
/// to the workflow log (the engine's recorder). Emission never fails the
/// caller; implementations swallow and log their own downstream errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit one event, returning it with its assigned sequence number.
    async fn emit(&self, event: Event) -> Event;
}

#[async_trait]
impl EventSink for EventBus {
    async fn emit(&self, event: Event) -> Event {
        self.publish(event)
    }
}
