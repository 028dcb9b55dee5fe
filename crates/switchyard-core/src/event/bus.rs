//! Lifecycle notification channel shared by the message bus, the saga
//! orchestrator and the circuit breaker registry.
//!
//! Publishing never blocks and never fails. Events published while nobody is
//! subscribed are dropped; a subscriber that falls more than `capacity`
//! events behind observes `Lagged` and skips ahead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use switchyard_types::event::BusEvent;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Follow the lifecycle of one message (sent, delivered, retried,
    /// dead-lettered). Subscribe before sending to see `MessageSent`.
    pub fn track(&self, message_id: impl Into<String>) -> MessageEvents {
        MessageEvents {
            message_id: message_id.into(),
            rx: self.sender.subscribe(),
        }
    }

    /// Publish `event`, returning how many subscribers received it.
    pub fn publish(&self, event: BusEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(event).unwrap_or(0)
    }

    /// Events published since the bus was created, including dropped ones.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .field("published", &self.published())
            .finish()
    }
}

/// Message-scoped view of the bus, see [`EventBus::track`].
pub struct MessageEvents {
    message_id: String,
    rx: broadcast::Receiver<BusEvent>,
}

impl MessageEvents {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Next event about the tracked message, or `None` once every
    /// `EventBus` clone is gone. Events lost to lag are skipped.
    pub async fn next(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.message_id() == Some(self.message_id.as_str()) => {
                    return Some(event);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(message_id = %self.message_id, skipped, "message tracker lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
