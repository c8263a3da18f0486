//! SSE event subscription endpoint.
//!
//! Subscribers get an initial `connection` frame carrying their assigned
//! client id, `ping` frames on an idle timer, and each queue event at most
//! once. The hub keeps only the latest event per queue; clients that
//! reconnect resume from whatever is current.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use uuid::Uuid;

use labtasker_core::events::{EventHub, EventSubscription};

use crate::auth::QueueContext;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Subscriber {
    hub: EventHub,
    queue_id: Uuid,
    client_id: String,
    last_ping: Instant,
    connected: bool,
}

pub async fn subscribe_events(
    ctx: QueueContext,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let hub = state.events.clone();
    let client_id = hub.next_client_id();
    tracing::debug!(queue_id = %ctx.queue_id(), client_id, "Event subscriber connected");

    let subscriber = Subscriber {
        hub,
        queue_id: ctx.queue_id(),
        client_id,
        last_ping: Instant::now(),
        connected: false,
    };

    let stream = futures::stream::unfold(subscriber, |mut sub| async move {
        if !sub.connected {
            sub.connected = true;
            let frame = EventSubscription {
                status: "connected".to_string(),
                client_id: sub.client_id.clone(),
            };
            let event = Event::default()
                .event("connection")
                .id(sub.hub.sequence(sub.queue_id).to_string())
                .retry(Duration::from_secs(3))
                .data(serde_json::to_string(&frame).unwrap_or_default());
            return Some((Ok(event), sub));
        }

        loop {
            if let Some(envelope) = sub.hub.poll(sub.queue_id, &sub.client_id) {
                let event = Event::default()
                    .event("event")
                    .id(envelope.sequence.to_string())
                    .data(serde_json::to_string(&envelope).unwrap_or_default());
                return Some((Ok(event), sub));
            }
            if sub.last_ping.elapsed() >= PING_INTERVAL {
                sub.last_ping = Instant::now();
                return Some((Ok(Event::default().event("ping")), sub));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    Sse::new(stream)
}
