//! Bridges lifecycle `BusEvent`s to structured `tracing` records.
//!
//! Observers that only need logs subscribe through [`spawn_event_logger`]
//! instead of consuming the broadcast channel themselves.

use switchyard_types::event::BusEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Log target for lifecycle records, so they can be filtered separately.
pub const EVENT_TARGET: &str = "switchyard::events";

/// Severity a lifecycle event is logged at.
pub fn event_level(event: &BusEvent) -> Level {
    match event {
        BusEvent::MessageDeadLettered { .. } | BusEvent::SagaFailed { .. } => Level::WARN,
        BusEvent::MessageRetryScheduled { .. }
        | BusEvent::CircuitStateChanged { .. }
        | BusEvent::EndpointRegistered { .. }
        | BusEvent::RouteCreated { .. }
        | BusEvent::ProcessorRegistered { .. }
        | BusEvent::SagaCreated { .. }
        | BusEvent::SagaCompleted { .. } => Level::INFO,
        BusEvent::MessageSent { .. } | BusEvent::MessageDelivered { .. } => Level::DEBUG,
    }
}

/// Emit one structured record for `event`.
pub fn log_event(event: &BusEvent) {
    match event {
        BusEvent::EndpointRegistered { endpoint_id, uri } => {
            tracing::info!(target: EVENT_TARGET, %endpoint_id, %uri, "endpoint registered");
        }
        BusEvent::RouteCreated { route_id, from } => {
            tracing::info!(target: EVENT_TARGET, %route_id, %from, "route created");
        }
        BusEvent::ProcessorRegistered { processor_id, kind } => {
            tracing::info!(target: EVENT_TARGET, %processor_id, ?kind, "processor registered");
        }
        BusEvent::MessageSent { message_id, source } => {
            tracing::debug!(target: EVENT_TARGET, %message_id, %source, "message sent");
        }
        BusEvent::MessageDelivered {
            message_id,
            route_id,
            endpoint_id,
            uri,
        } => {
            tracing::debug!(
                target: EVENT_TARGET,
                %message_id,
                %route_id,
                %endpoint_id,
                %uri,
                "message delivered"
            );
        }
        BusEvent::MessageRetryScheduled {
            message_id,
            retry_count,
            delay_ms,
        } => {
            tracing::info!(
                target: EVENT_TARGET,
                %message_id,
                retry_count,
                delay_ms,
                "message retry scheduled"
            );
        }
        BusEvent::MessageDeadLettered { message_id, reason } => {
            tracing::warn!(target: EVENT_TARGET, %message_id, %reason, "message dead-lettered");
        }
        BusEvent::SagaCreated {
            definition_id,
            steps,
        } => {
            tracing::info!(target: EVENT_TARGET, %definition_id, steps, "saga created");
        }
        BusEvent::SagaCompleted {
            saga_id,
            definition_id,
            duration_ms,
            steps_completed,
        } => {
            tracing::info!(
                target: EVENT_TARGET,
                %saga_id,
                %definition_id,
                duration_ms,
                steps_completed,
                "saga completed"
            );
        }
        BusEvent::SagaFailed {
            saga_id,
            definition_id,
            failed_step,
            error,
        } => {
            tracing::warn!(
                target: EVENT_TARGET,
                %saga_id,
                %definition_id,
                %failed_step,
                %error,
                "saga failed"
            );
        }
        BusEvent::CircuitStateChanged { name, from, to } => {
            tracing::info!(target: EVENT_TARGET, breaker = %name, %from, %to, "circuit state changed");
        }
    }
}

/// Spawn a task logging every event from `events` until `token` is cancelled
/// or the channel closes. The task returns the number of events logged.
pub fn spawn_event_logger(
    mut events: broadcast::Receiver<BusEvent>,
    token: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut logged = 0u64;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        log_event(&event);
                        logged += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: EVENT_TARGET, skipped, "event logger lagged, events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        logged
    })
}
