//! Event recording: bus fan-out plus durable workflow log.

use crate::repositories::EventRepository;
use amelia_events::{Event, EventBus, EventSink};
use async_trait::async_trait;
use tracing::error;

/// [`EventSink`] that sequences events on the bus and persists them to
/// the `workflow_log` table.
///
/// Publishing never fails the emitter: a failed log insert is reported
/// through `tracing` and dropped. Checkpoints, not the log, are the
/// recovery source of truth.
#[derive(Clone, Debug)]
pub struct EventRecorder {
    bus: EventBus,
    log: EventRepository,
}

impl EventRecorder {
    pub fn new(bus: EventBus, log: EventRepository) -> Self {
        Self { bus, log }
    }

    /// The underlying bus, for subscriptions and backfill.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[async_trait]
impl EventSink for EventRecorder {
    async fn emit(&self, event: Event) -> Event {
        let sequenced = self.bus.publish(event);
        if let Err(err) = self.log.insert(&sequenced).await {
            error!(
                workflow_id = %sequenced.workflow_id,
                sequence = sequenced.sequence,
                error = %err,
                "failed to persist workflow log event"
            );
        }
        sequenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use amelia_events::EventType;
    use uuid::Uuid;

    #[tokio::test]
    async fn emit_sequences_and_persists() {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        let recorder = EventRecorder::new(EventBus::default(), EventRepository::new(db.clone()));

        let wf = Uuid::new_v4();
        let first = recorder.emit(Event::workflow_started(wf)).await;
        let second = recorder.emit(Event::stage_started(wf, "architect")).await;
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let logged = EventRepository::new(db).list_since(wf, 0).await.unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].event_type, EventType::WorkflowStarted);
        assert_eq!(logged[1].sequence, 2);
    }
}
