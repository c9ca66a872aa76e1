//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Publishing never blocks the control path: a slow subscriber
//! lags and loses old events instead.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Confirmed poses |
//! | [`Topic::Sequence`] | Pick/place/home state transitions, processed objects |
//! | [`Topic::Search`] | Search traversal lifecycle |
//! | [`Topic::Alerts`] | Faults and operator signals |

use graspos_types::{ArmError, Event, EventPayload};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Sequence,
    Search,
    Alerts,
}

impl Topic {
    /// The lane a payload is routed to by [`EventBus::publish`].
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::PoseUpdate(_) => Topic::Telemetry,
            EventPayload::Sequence { .. } | EventPayload::ObjectProcessed { .. } => Topic::Sequence,
            EventPayload::Search(_) => Topic::Search,
            EventPayload::Fault { .. } | EventPayload::OperatorSignal(_) => Topic::Alerts,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    sequence: broadcast::Sender<Event>,
    search: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (sequence, _) = broadcast::channel(capacity);
        let (search, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            sequence,
            search,
            alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`ArmError::Channel`] when nobody is listening on the topic.  Status
    /// publishers treat that as a normal condition and ignore it.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, ArmError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| ArmError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Publish `event` on the topic its payload belongs to.
    pub fn publish(&self, event: Event) -> Result<usize, ArmError> {
        self.publish_to(Topic::for_payload(&event.payload), event)
    }

    /// Stamp `payload` with `source` and publish it.
    pub fn emit(&self, source: &str, payload: EventPayload) -> Result<usize, ArmError> {
        self.publish(Event::new(source, payload))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Sequence => &self.sequence,
            Topic::Search => &self.search,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Return the next already-buffered event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
