//! In-process event bus with per-workflow ordering and bounded backfill.
//!
//! The bus assigns each event a monotonic per-workflow sequence under a
//! short lock, keeps the most recent events per workflow in a bounded ring
//! for backfill, and fans out live events over a `tokio::sync::broadcast`
//! channel. Publishing never blocks and never fails the publisher: a slow
//! subscriber drops events only for itself and is handed a single
//! [`StreamItem::Lagged`] sentinel before its stream ends.

use crate::event::Event;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use uuid::Uuid;

/// Bus tuning knobs.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Events retained per workflow for backfill.
    pub ring_capacity: usize,

    /// Broadcast channel capacity shared by all live subscribers.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            channel_capacity: 1024,
        }
    }
}

/// Which workflows a subscription observes.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    /// Every workflow on the bus.
    All,
    /// Only the listed workflows.
    Workflows(Vec<Uuid>),
}

impl SubscriptionFilter {
    fn matches(&self, workflow_id: &Uuid) -> bool {
        match self {
            Self::All => true,
            Self::Workflows(ids) => ids.contains(workflow_id),
        }
    }
}

/// Item yielded by a subscription stream.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A sequenced event.
    Event(Event),
    /// The subscriber fell behind; `skipped` events were dropped for it.
    /// The stream ends after this item.
    Lagged { skipped: u64 },
}

/// Result of a backfill query.
#[derive(Debug, Clone)]
pub struct Backfill {
    /// Events with `sequence > since_sequence`, oldest first.
    pub events: Vec<Event>,

    /// True when `since_sequence` predates the oldest event still held,
    /// meaning some requested events have been evicted from the ring.
    pub expired: bool,
}

#[derive(Debug, Default)]
struct WorkflowLane {
    next_sequence: u64,
    ring: VecDeque<Event>,
}

/// In-process event bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    config: EventBusConfig,
    lanes: Mutex<HashMap<Uuid, WorkflowLane>>,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(mut config: EventBusConfig) -> Self {
        config.ring_capacity = config.ring_capacity.max(1);
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                lanes: Mutex::new(HashMap::new()),
                sender,
            }),
        }
    }

    /// Publish an event, assigning its per-workflow sequence.
    ///
    /// Returns the sequenced event. Never blocks; publishing with no
    /// subscribers only fills the backfill ring.
    pub fn publish(&self, mut event: Event) -> Event {
        {
            let mut lanes = self.inner.lanes.lock();
            let lane = lanes.entry(event.workflow_id).or_default();
            lane.next_sequence += 1;
            event.sequence = lane.next_sequence;

            if lane.ring.len() == self.inner.config.ring_capacity {
                lane.ring.pop_front();
            }
            lane.ring.push_back(event.clone());
        }

        // A send error only means no live subscribers.
        let _ = self.inner.sender.send(event.clone());
        event
    }

    /// Advance a workflow's sequence counter to at least `last`.
    ///
    /// Called during restart recovery so sequences continue from the
    /// persisted log instead of restarting at 1. Never moves a counter
    /// backwards.
    pub fn prime_sequence(&self, workflow_id: Uuid, last: u64) {
        let mut lanes = self.inner.lanes.lock();
        let lane = lanes.entry(workflow_id).or_default();
        lane.next_sequence = lane.next_sequence.max(last);
    }

    /// Highest sequence assigned for a workflow, if any event was published.
    pub fn last_sequence(&self, workflow_id: Uuid) -> Option<u64> {
        let lanes = self.inner.lanes.lock();
        lanes
            .get(&workflow_id)
            .filter(|lane| lane.next_sequence > 0)
            .map(|lane| lane.next_sequence)
    }

    /// Return the events still held with `sequence > since_sequence`.
    pub fn backfill(&self, workflow_id: Uuid, since_sequence: u64) -> Backfill {
        let lanes = self.inner.lanes.lock();
        let Some(lane) = lanes.get(&workflow_id) else {
            return Backfill {
                events: Vec::new(),
                expired: false,
            };
        };

        let oldest_held = lane.ring.front().map(|e| e.sequence);
        // Expired when events between since_sequence and the oldest held
        // one have already been evicted.
        let expired = match oldest_held {
            Some(oldest) => since_sequence + 1 < oldest,
            None => lane.next_sequence > since_sequence,
        };

        let events = lane
            .ring
            .iter()
            .filter(|e| e.sequence > since_sequence)
            .cloned()
            .collect();

        Backfill { events, expired }
    }

    /// Subscribe to future events, optionally backfilling from
    /// `since_sequence` for every workflow named by the filter.
    ///
    /// Backfilled events are yielded first, oldest first, followed by live
    /// events; duplicates across the handover are suppressed. A lagging
    /// subscriber receives one [`StreamItem::Lagged`] and the stream ends.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        since_sequence: Option<u64>,
    ) -> impl Stream<Item = StreamItem> + Send + 'static {
        // Take the live receiver before snapshotting the rings so no event
        // can fall between backfill and the live stream.
        let mut receiver = self.inner.sender.subscribe();

        let mut replay: Vec<Event> = Vec::new();
        let mut seen: HashMap<Uuid, u64> = HashMap::new();
        if let Some(since) = since_sequence {
            let ids: Vec<Uuid> = match &filter {
                SubscriptionFilter::All => self.inner.lanes.lock().keys().copied().collect(),
                SubscriptionFilter::Workflows(ids) => ids.clone(),
            };
            for id in ids {
                let backfill = self.backfill(id, since);
                if let Some(last) = backfill.events.last() {
                    seen.insert(id, last.sequence);
                }
                replay.extend(backfill.events);
            }
            replay.sort_by_key(|e| (e.workflow_id, e.sequence));
        }

        async_stream::stream! {
            for event in replay {
                yield StreamItem::Event(event);
            }

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if !filter.matches(&event.workflow_id) {
                            continue;
                        }
                        if let Some(last) = seen.get(&event.workflow_id) {
                            if event.sequence <= *last {
                                continue;
                            }
                        }
                        seen.insert(event.workflow_id, event.sequence);
                        yield StreamItem::Event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagged, disconnecting");
                        yield StreamItem::Lagged { skipped };
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("ring_capacity", &self.inner.config.ring_capacity)
            .field("receiver_count", &self.inner.sender.receiver_count())
            .finish()
    }
}
