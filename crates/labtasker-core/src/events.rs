//! In-process event fan-out.
//!
//! Each queue has a single "current event" slot: the latest transition, a
//! strictly monotonic sequence number, and the set of client ids that have
//! already consumed it. Delivery is best-effort; a disconnected client
//! loses whatever happened while it was away. No durable log is kept.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task or worker state transition, as published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransitionEvent {
    /// "task" or "worker".
    pub entity_type: String,
    pub entity_id: Uuid,
    pub queue_id: Uuid,
    pub old_state: String,
    pub new_state: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Wire frame for an `event` SSE message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: StateTransitionEvent,
}

/// Wire frame for the initial `connection` SSE message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscription {
    pub status: String,
    pub client_id: String,
}

struct QueueSlot {
    sequence: u64,
    current: Option<EventEnvelope>,
    receivers: HashSet<String>,
}

impl QueueSlot {
    fn new() -> Self {
        Self {
            sequence: 0,
            current: None,
            receivers: HashSet::new(),
        }
    }
}

/// Shared event hub; cheap to clone.
#[derive(Clone)]
pub struct EventHub {
    queues: Arc<Mutex<HashMap<Uuid, QueueSlot>>>,
    client_counter: Arc<AtomicU64>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            client_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Assign a fresh subscriber id.
    pub fn next_client_id(&self) -> String {
        let n = self.client_counter.fetch_add(1, Ordering::Relaxed);
        format!("client-{}", n)
    }

    /// Publish a transition, bumping the queue sequence and resetting the
    /// consumed-receivers set.
    pub fn publish(&self, event: StateTransitionEvent) {
        let mut queues = self.queues.lock().expect("event hub poisoned");
        let slot = queues.entry(event.queue_id).or_insert_with(QueueSlot::new);
        slot.sequence += 1;
        slot.current = Some(EventEnvelope {
            sequence: slot.sequence,
            timestamp: Utc::now(),
            event,
        });
        slot.receivers.clear();
    }

    /// Return the current event for `client_id` if it has not consumed it
    /// yet, marking it consumed. At-most-once per client per event.
    pub fn poll(&self, queue_id: Uuid, client_id: &str) -> Option<EventEnvelope> {
        let mut queues = self.queues.lock().expect("event hub poisoned");
        let slot = queues.get_mut(&queue_id)?;
        if slot.current.is_none() || slot.receivers.contains(client_id) {
            return None;
        }
        slot.receivers.insert(client_id.to_string());
        slot.current.clone()
    }

    /// Latest sequence number for a queue (0 when nothing was published).
    pub fn sequence(&self, queue_id: Uuid) -> u64 {
        let queues = self.queues.lock().expect("event hub poisoned");
        queues.get(&queue_id).map(|s| s.sequence).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_for(queue_id: Uuid, new_state: &str) -> StateTransitionEvent {
        StateTransitionEvent {
            entity_type: "task".to_string(),
            entity_id: Uuid::new_v4(),
            queue_id,
            old_state: "pending".to_string(),
            new_state: new_state.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn sequences_are_monotonic_per_queue() {
        let hub = EventHub::new();
        let q1 = Uuid::new_v4();
        let q2 = Uuid::new_v4();

        hub.publish(event_for(q1, "running"));
        hub.publish(event_for(q1, "success"));
        hub.publish(event_for(q2, "running"));

        assert_eq!(hub.sequence(q1), 2);
        assert_eq!(hub.sequence(q2), 1);
    }

    #[test]
    fn each_client_sees_an_event_exactly_once() {
        let hub = EventHub::new();
        let queue = Uuid::new_v4();
        hub.publish(event_for(queue, "running"));

        let envelope = hub.poll(queue, "client-0").expect("first poll yields event");
        assert_eq!(envelope.sequence, 1);
        assert!(hub.poll(queue, "client-0").is_none());

        // A different client still sees it.
        assert!(hub.poll(queue, "client-1").is_some());
    }

    #[test]
    fn new_event_resets_consumption() {
        let hub = EventHub::new();
        let queue = Uuid::new_v4();
        hub.publish(event_for(queue, "running"));
        assert!(hub.poll(queue, "c").is_some());

        hub.publish(event_for(queue, "success"));
        let envelope = hub.poll(queue, "c").expect("new event is delivered");
        assert_eq!(envelope.sequence, 2);
        assert_eq!(envelope.event.new_state, "success");
    }

    #[test]
    fn client_ids_are_unique() {
        let hub = EventHub::new();
        assert_ne!(hub.next_client_id(), hub.next_client_id());
    }
}
