//! Lifecycle notifications emitted by the bus, the saga orchestrator and the
//! circuit-breaker registry.
//!
//! `BusEvent` is a closed set of notification kinds. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::circuit::CircuitState;
use crate::route::ProcessorKind;

/// Events broadcast to external observers (loggers, dashboards, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    EndpointRegistered {
        endpoint_id: String,
        uri: String,
    },

    RouteCreated {
        route_id: String,
        from: String,
    },

    ProcessorRegistered {
        processor_id: String,
        kind: ProcessorKind,
    },

    /// A message was accepted into the live queue.
    MessageSent {
        message_id: String,
        source: String,
    },

    /// A message was handed to an endpoint.
    MessageDelivered {
        message_id: String,
        route_id: String,
        endpoint_id: String,
        uri: String,
    },

    /// A failed message will be re-enqueued after `delay_ms`.
    MessageRetryScheduled {
        message_id: String,
        retry_count: u32,
        delay_ms: u64,
    },

    MessageDeadLettered {
        message_id: String,
        reason: String,
    },

    SagaCreated {
        definition_id: String,
        steps: usize,
    },

    SagaCompleted {
        saga_id: Uuid,
        definition_id: String,
        duration_ms: u64,
        steps_completed: usize,
    },

    SagaFailed {
        saga_id: Uuid,
        definition_id: String,
        failed_step: String,
        error: String,
    },

    CircuitStateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
}

impl BusEvent {
    /// The message ID for message-scoped events.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            BusEvent::MessageSent { message_id, .. }
            | BusEvent::MessageDelivered { message_id, .. }
            | BusEvent::MessageRetryScheduled { message_id, .. }
            | BusEvent::MessageDeadLettered { message_id, .. } => Some(message_id),

            BusEvent::EndpointRegistered { .. }
            | BusEvent::RouteCreated { .. }
            | BusEvent::ProcessorRegistered { .. }
            | BusEvent::SagaCreated { .. }
            | BusEvent::SagaCompleted { .. }
            | BusEvent::SagaFailed { .. }
            | BusEvent::CircuitStateChanged { .. } => None,
        }
    }
}
