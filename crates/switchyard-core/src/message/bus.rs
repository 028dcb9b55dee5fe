//! Message bus facade: registration, enqueue, and background task lifecycle.
//!
//! The `MessageBus` owns the registries, the bounded live queue, the retry
//! scheduler and the dead-letter store. Nothing is processed until
//! [`MessageBus::start`] spawns the dispatcher; messages sent earlier wait in
//! the queue.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use switchyard_types::config::{BusConfig, SwitchyardConfig};
use switchyard_types::endpoint::Endpoint;
use switchyard_types::error::ValidationError;
use switchyard_types::event::BusEvent;
use switchyard_types::message::Message;
use switchyard_types::route::{Route, RouteMetrics};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dead_letter::{DeadLetterEntry, DeadLetterStore, TTL_EXPIRED_REASON};
use super::delivery::BoxDeliverer;
use super::dispatcher::Dispatcher;
use super::envelope;
use super::processor::BoxProcessor;
use super::registry::{Registry, RegisteredEndpoint};
use super::retry::{RetryScheduler, retry_channel};
use crate::circuit::CircuitBreakerRegistry;
use crate::event::{EventBus, MessageEvents};

/// Errors returned to producers by the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The envelope is malformed. Never retried.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The live queue is at capacity.
    #[error("live queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("message bus already started")]
    AlreadyStarted,

    /// The dispatcher has stopped and no longer accepts messages.
    #[error("message bus is closed")]
    Closed,
}

type PendingStart = (mpsc::Receiver<Message>, RetryScheduler);

pub struct MessageBus {
    dispatcher: Arc<Dispatcher>,
    queue: mpsc::Sender<Message>,
    queue_capacity: usize,
    default_max_retries: u32,
    pending_start: Mutex<Option<PendingStart>>,
}

impl MessageBus {
    pub fn new(config: &BusConfig, events: EventBus, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        let (queue, rx) = mpsc::channel(queue_capacity);
        let (retries, scheduler) = retry_channel();

        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::new(Registry::new()),
            dead_letters: Arc::new(DeadLetterStore::new(config.dead_letter_capacity)),
            retries,
            events,
            breakers,
            retry_base_delay: config.retry_base_delay(),
        });

        Self {
            dispatcher,
            queue,
            queue_capacity,
            default_max_retries: config.default_max_retries,
            pending_start: Mutex::new(Some((rx, scheduler))),
        }
    }

    /// Build a bus with its own event bus and a breaker registry publishing on it.
    pub fn from_config(config: &SwitchyardConfig) -> Self {
        let events = EventBus::new(config.bus.event_capacity);
        let breakers = Arc::new(CircuitBreakerRegistry::with_events(
            config.circuit_breaker,
            events.clone(),
        ));
        Self::new(&config.bus, events, breakers)
    }

    pub fn events(&self) -> &EventBus {
        &self.dispatcher.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.dispatcher.events.subscribe()
    }

    /// Lifecycle events of one message. Call before `send_message`.
    pub fn track(&self, message_id: impl Into<String>) -> MessageEvents {
        self.dispatcher.events.track(message_id)
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.dispatcher.breakers
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an endpoint. Without a deliverer it is a notification-only sink.
    pub fn register_endpoint(&self, endpoint: Endpoint, deliverer: Option<BoxDeliverer>) {
        let endpoint_id = endpoint.id.clone();
        let uri = endpoint.uri.clone();
        info!(
            %endpoint_id,
            %uri,
            role = ?endpoint.role,
            notification_only = deliverer.is_none(),
            "endpoint registered"
        );
        self.dispatcher.registry.register_endpoint(endpoint, deliverer);
        self.dispatcher
            .events
            .publish(BusEvent::EndpointRegistered { endpoint_id, uri });
    }

    /// Create (or replace) a route with zeroed metrics.
    pub fn create_route(&self, route: Route) -> Route {
        let route = self.dispatcher.registry.create_route(route);
        info!(
            route_id = %route.id,
            from = %route.from,
            destinations = route.to.len(),
            processors = route.processors.len(),
            "route created"
        );
        self.dispatcher.events.publish(BusEvent::RouteCreated {
            route_id: route.id.clone(),
            from: route.from.clone(),
        });
        route
    }

    pub fn register_processor(&self, processor: BoxProcessor) {
        let processor_id = processor.id().to_string();
        let kind = processor.kind();
        info!(%processor_id, ?kind, "processor registered");
        self.dispatcher.registry.register_processor(processor);
        self.dispatcher
            .events
            .publish(BusEvent::ProcessorRegistered { processor_id, kind });
    }

    pub fn endpoint(&self, id: &str) -> Option<RegisteredEndpoint> {
        self.dispatcher.registry.endpoint(id)
    }

    pub fn route(&self, id: &str) -> Option<Route> {
        self.dispatcher.registry.route(id)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.dispatcher.registry.routes()
    }

    pub fn set_route_enabled(&self, route_id: &str, enabled: bool) -> bool {
        self.dispatcher.registry.set_route_enabled(route_id, enabled)
    }

    pub fn route_metrics(&self, route_id: &str) -> Option<RouteMetrics> {
        self.dispatcher.registry.route_metrics(route_id)
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Build a message carrying the configured `default_max_retries` budget.
    pub fn message(&self, source: impl Into<String>, body: serde_json::Value) -> Message {
        envelope::new(source, body, self.default_max_retries)
    }

    /// Like [`MessageBus::message`], addressed to an explicit destination URI.
    pub fn addressed_message(
        &self,
        source: impl Into<String>,
        destination: impl Into<String>,
        body: serde_json::Value,
    ) -> Message {
        envelope::addressed(source, destination, body, self.default_max_retries)
    }

    /// Validate and enqueue a message.
    ///
    /// An already-expired message never enters the live queue; it goes
    /// straight to the dead-letter store and `Ok(())` is returned.
    pub fn send_message(&self, message: Message) -> Result<(), BusError> {
        message.validate()?;

        if message.is_expired_at(Utc::now()) {
            debug!(message_id = %message.id, ttl_ms = ?message.ttl_ms, "message expired before enqueue");
            self.dispatcher.dead_letter(message, TTL_EXPIRED_REASON);
            return Ok(());
        }

        let message_id = message.id.clone();
        let source = message.source.clone();
        match self.queue.try_send(message) {
            Ok(()) => {
                debug!(%message_id, %source, "message enqueued");
                self.dispatcher
                    .events
                    .publish(BusEvent::MessageSent { message_id, source });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%message_id, capacity = self.queue_capacity, "live queue full, message rejected");
                Err(BusError::QueueFull {
                    capacity: self.queue_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    /// Messages waiting in the live queue.
    pub fn queue_depth(&self) -> usize {
        self.queue_capacity - self.queue.capacity()
    }

    /// Messages waiting for their retry backoff to elapse.
    pub fn pending_retries(&self) -> usize {
        self.dispatcher.retries.pending()
    }

    // -----------------------------------------------------------------------
    // Dead letters
    // -----------------------------------------------------------------------

    /// Remove dead letters older than `older_than_hours`. Returns the count removed.
    pub fn clear_dead_letter_queue(&self, older_than_hours: u64) -> usize {
        let removed = self.dispatcher.dead_letters.clear_older_than(older_than_hours);
        info!(removed, older_than_hours, "dead-letter queue cleared");
        removed
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dispatcher.dead_letters.entries()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dispatcher.dead_letters.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the dispatcher, the retry scheduler and the circuit monitor.
    ///
    /// Can be called once. The returned handle stops all three when shut
    /// down or dropped.
    pub fn start(&self) -> Result<BusHandle, BusError> {
        let (rx, scheduler) = self
            .pending_start
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(BusError::AlreadyStarted)?;

        let token = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(Arc::clone(&self.dispatcher).run(rx, token.clone())),
            tokio::spawn(scheduler.run(self.queue.clone(), token.clone())),
            self.dispatcher.breakers.spawn_monitor(token.clone()),
        ];
        info!(queue_capacity = self.queue_capacity, "message bus started");

        Ok(BusHandle { token, tasks })
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("registry", &self.dispatcher.registry)
            .field("queue_capacity", &self.queue_capacity)
            .field("dead_letters", &self.dispatcher.dead_letters.len())
            .finish()
    }
}

/// Handle to the bus background tasks. Dropping it cancels them.
pub struct BusHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BusHandle {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal all tasks to stop. Pending retries are dropped.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for all tasks to finish.
    pub async fn join(mut self) {
        self.token.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "bus task ended abnormally");
            }
        }
        info!("message bus stopped");
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
