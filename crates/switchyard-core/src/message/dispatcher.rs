//! Single-consumer dispatch loop.
//!
//! One task drains the live queue, runs each message through every matching
//! route (processors, then delivery to each destination URI), records route
//! metrics, and hands failures to the retry or dead-letter path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use switchyard_types::event::BusEvent;
use switchyard_types::message::Message;
use switchyard_types::route::Route;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dead_letter::{DeadLetterEntry, DeadLetterStore};
use super::envelope;
use super::processor::ProcessOutcome;
use super::registry::{Registry, RegisteredEndpoint};
use super::retry::{RetryQueue, backoff_delay};
use crate::circuit::{CircuitBreakerRegistry, CircuitError};
use crate::event::EventBus;

/// Why one processing attempt of a message failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no route matches source '{message_source}'")]
    NoRoute { message_source: String },

    #[error("processor '{0}' is not registered")]
    ProcessorNotFound(String),

    #[error("processor '{processor_id}' failed: {reason}")]
    Processor {
        processor_id: String,
        reason: String,
    },

    #[error("no endpoint registered for '{0}'")]
    EndpointNotFound(String),

    #[error("endpoint '{0}' is disabled")]
    EndpointDisabled(String),

    #[error("delivery to '{endpoint_id}' failed: {reason}")]
    Delivery { endpoint_id: String, reason: String },

    #[error("circuit for endpoint '{0}' is open")]
    CircuitOpen(String),
}

/// A route failure plus the failing endpoint's own error-handler route.
struct RouteFailure {
    error: DispatchError,
    endpoint_error_handler: Option<String>,
}

impl From<DispatchError> for RouteFailure {
    fn from(error: DispatchError) -> Self {
        Self {
            error,
            endpoint_error_handler: None,
        }
    }
}

/// State shared between the bus facade and the dispatch task.
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<Registry>,
    pub(crate) dead_letters: Arc<DeadLetterStore>,
    pub(crate) retries: RetryQueue,
    pub(crate) events: EventBus,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) retry_base_delay: Duration,
}

impl Dispatcher {
    /// Drain `rx` until cancelled. A message already being processed runs to
    /// completion before cancellation is observed.
    pub(crate) async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Message>, token: CancellationToken) {
        debug!("dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(message) => self.process(message).await,
                    None => break,
                },
            }
        }
        debug!("dispatcher stopped");
    }

    /// Run one message through its routes, then retry or dead-letter on failure.
    pub(crate) async fn process(&self, message: Message) {
        if let Err(err) = self.dispatch(&message).await {
            warn!(
                message_id = %message.id,
                source = %message.source,
                retry_count = message.retry_count,
                error = %err,
                "message processing failed"
            );
            self.handle_failure(message, &err);
        }
    }

    async fn dispatch(&self, message: &Message) -> Result<(), DispatchError> {
        let routes = self
            .registry
            .matching_routes(&message.source, message.destination.as_deref());
        if routes.is_empty() {
            return Err(DispatchError::NoRoute {
                message_source: message.source.clone(),
            });
        }

        for route in &routes {
            let started = Instant::now();
            let result = self.run_route(route, message.clone()).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.registry
                .record_route_attempt(&route.id, result.is_ok(), elapsed_ms, Utc::now());

            if let Err(failure) = result {
                if let Some(handler) = &route.error_handler {
                    self.invoke_error_route(handler, &route.id, message, &failure.error)
                        .await;
                }
                if let Some(handler) = &failure.endpoint_error_handler {
                    self.invoke_error_route(handler, &route.id, message, &failure.error)
                        .await;
                }
                return Err(failure.error);
            }
        }
        Ok(())
    }

    async fn run_route(&self, route: &Route, message: Message) -> Result<(), RouteFailure> {
        let mut current = message;
        for processor_id in &route.processors {
            let processor = self
                .registry
                .processor(processor_id)
                .ok_or_else(|| DispatchError::ProcessorNotFound(processor_id.clone()))?;

            let outcome = processor
                .process(current)
                .await
                .map_err(|e| DispatchError::Processor {
                    processor_id: processor_id.clone(),
                    reason: format!("{e:#}"),
                })?;

            match outcome {
                ProcessOutcome::Forward(next) => current = next,
                ProcessOutcome::ForwardMany(parts) => {
                    debug!(route_id = %route.id, %processor_id, parts = parts.len(), "message split");
                    for part in &parts {
                        self.deliver_all(route, part).await?;
                    }
                    return Ok(());
                }
                ProcessOutcome::Drop => {
                    debug!(route_id = %route.id, %processor_id, "message dropped by processor");
                    return Ok(());
                }
            }
        }
        self.deliver_all(route, &current).await
    }

    async fn deliver_all(&self, route: &Route, message: &Message) -> Result<(), RouteFailure> {
        for uri in &route.to {
            let target = self
                .registry
                .endpoint_by_uri(uri)
                .ok_or_else(|| DispatchError::EndpointNotFound(uri.clone()))?;
            self.deliver(route, &target, message).await?;
        }
        Ok(())
    }

    async fn deliver(
        &self,
        route: &Route,
        target: &RegisteredEndpoint,
        message: &Message,
    ) -> Result<(), RouteFailure> {
        let endpoint = &target.endpoint;
        let fail = |error| RouteFailure {
            error,
            endpoint_error_handler: endpoint.error_handler.clone(),
        };

        if !endpoint.enabled {
            return Err(fail(DispatchError::EndpointDisabled(endpoint.id.clone())));
        }

        if let Some(deliverer) = &target.deliverer {
            let outcome = self
                .breakers
                .execute(&endpoint.id, || deliverer.deliver(endpoint, message))
                .await;
            match outcome {
                Ok(()) => {}
                Err(CircuitError::Open { .. }) => {
                    return Err(fail(DispatchError::CircuitOpen(endpoint.id.clone())));
                }
                Err(CircuitError::Inner(e)) => {
                    return Err(fail(DispatchError::Delivery {
                        endpoint_id: endpoint.id.clone(),
                        reason: format!("{e:#}"),
                    }));
                }
            }
        }

        debug!(
            message_id = %message.id,
            route_id = %route.id,
            endpoint_id = %endpoint.id,
            uri = %endpoint.uri,
            "message delivered"
        );
        self.events.publish(BusEvent::MessageDelivered {
            message_id: message.id.clone(),
            route_id: route.id.clone(),
            endpoint_id: endpoint.id.clone(),
            uri: endpoint.uri.clone(),
        });
        Ok(())
    }

    /// Best-effort: run the wrapped error through the handler route once.
    /// Handler failures are logged and never escalate further.
    async fn invoke_error_route(
        &self,
        handler_id: &str,
        failed_route_id: &str,
        original: &Message,
        err: &DispatchError,
    ) {
        let Some(handler) = self.registry.route(handler_id) else {
            warn!(handler_id, failed_route_id, "error-handler route not found");
            return;
        };
        if !handler.enabled {
            debug!(handler_id, "error-handler route disabled, skipping");
            return;
        }

        let wrapper = envelope::wrap_error(original, failed_route_id, &err.to_string());
        if let Err(failure) = self.run_route(&handler, wrapper).await {
            error!(
                handler_id,
                failed_route_id,
                original_message_id = %original.id,
                error = %failure.error,
                "error-handler route failed"
            );
        }
    }

    fn handle_failure(&self, mut message: Message, err: &DispatchError) {
        message.retry_count += 1;
        if message.retry_count > message.max_retries {
            let reason = format!("max retries exceeded: {err}");
            self.dead_letter(message, reason);
            return;
        }

        let delay = backoff_delay(self.retry_base_delay, message.retry_count);
        let message_id = message.id.clone();
        let retry_count = message.retry_count;
        if !self.retries.schedule(message.clone(), delay) {
            self.dead_letter(message, format!("retry scheduler unavailable: {err}"));
            return;
        }

        info!(
            %message_id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        self.events.publish(BusEvent::MessageRetryScheduled {
            message_id,
            retry_count,
            delay_ms: delay.as_millis() as u64,
        });
    }

    pub(crate) fn dead_letter(&self, message: Message, reason: impl Into<String>) -> DeadLetterEntry {
        let entry = self.dead_letters.push(message, reason);
        warn!(
            message_id = %entry.message.id,
            reason = %entry.reason,
            "message dead-lettered"
        );
        self.events.publish(BusEvent::MessageDeadLettered {
            message_id: entry.message.id.clone(),
            reason: entry.reason.clone(),
        });
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::delivery::{BoxDeliverer, FnDeliverer};
    use crate::message::processor::{BoxProcessor, FnProcessor};
    use crate::message::retry::{RetryScheduler, retry_channel};
    use serde_json::json;
    use std::sync::Mutex;
    use switchyard_types::circuit::CircuitBreakerConfig;
    use switchyard_types::endpoint::{Endpoint, EndpointRole};
    use switchyard_types::route::ProcessorKind;

    type Seen = Arc<Mutex<Vec<Message>>>;

    fn dispatcher() -> (Dispatcher, RetryScheduler) {
        let (retries, scheduler) = retry_channel();
        let dispatcher = Dispatcher {
            registry: Arc::new(Registry::new()),
            dead_letters: Arc::new(DeadLetterStore::new(100)),
            retries,
            events: EventBus::new(64),
            breakers: Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            retry_base_delay: Duration::from_millis(5),
        };
        (dispatcher, scheduler)
    }

    fn recording_sink(d: &Dispatcher, id: &str, uri: &str) -> Seen {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        d.registry.register_endpoint(
            Endpoint::new(id, EndpointRole::Sink, id, uri),
            Some(BoxDeliverer::new(FnDeliverer::new(move |_ep, msg| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(msg);
                    Ok(())
                }
            }))),
        );
        seen
    }

    fn failing_sink(d: &Dispatcher, id: &str, uri: &str) {
        d.registry.register_endpoint(
            Endpoint::new(id, EndpointRole::Sink, id, uri),
            Some(BoxDeliverer::new(FnDeliverer::new(|_ep, _msg| async {
                Err::<(), _>(anyhow::anyhow!("connection refused"))
            }))),
        );
    }

    #[tokio::test]
    async fn delivers_through_processor_chain() {
        let (d, _scheduler) = dispatcher();
        let seen = recording_sink(&d, "out", "sink://out");
        d.registry.register_processor(BoxProcessor::new(FnProcessor::new(
            "stamp",
            ProcessorKind::Enricher,
            |mut m: Message| async move {
                m.headers.insert("stamped".into(), json!(true));
                Ok(ProcessOutcome::Forward(m))
            },
        )));
        d.registry.create_route(Route::new(
            "r1",
            "r1",
            "src://in",
            vec!["sink://out".into()],
            vec!["stamp".into()],
        ));

        d.process(envelope::new("src://in", json!({"n": 1}), 0)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers.get("stamped"), Some(&json!(true)));
        assert_eq!(d.registry.route_metrics("r1").unwrap().messages_processed, 1);
        assert!(d.dead_letters.is_empty());
    }

    #[tokio::test]
    async fn no_route_with_zero_budget_dead_letters() {
        let (d, _scheduler) = dispatcher();
        d.process(envelope::new("src://nowhere", json!(null), 0)).await;

        let entries = d.dead_letters.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].reason.starts_with("max retries exceeded"));
        assert_eq!(entries[0].message.retry_count, 1);
    }

    #[tokio::test]
    async fn failure_with_budget_schedules_retry() {
        let (d, _scheduler) = dispatcher();
        let mut events = d.events.subscribe();
        failing_sink(&d, "db", "db://orders");
        d.registry
            .create_route(Route::new("r1", "r1", "src://in", vec!["db://orders".into()], vec![]));

        d.process(envelope::new("src://in", json!(null), 2)).await;

        assert_eq!(d.retries.pending(), 1);
        assert!(d.dead_letters.is_empty());
        let metrics = d.registry.route_metrics("r1").unwrap();
        assert_eq!(metrics.messages_failed, 1);
        assert_eq!(metrics.error_rate, 1.0);

        match events.recv().await.unwrap() {
            BusEvent::MessageRetryScheduled {
                retry_count,
                delay_ms,
                ..
            } => {
                assert_eq!(retry_count, 1);
                assert_eq!(delay_ms, 10);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn filter_drop_delivers_nothing_and_counts_success() {
        let (d, _scheduler) = dispatcher();
        let seen = recording_sink(&d, "out", "sink://out");
        d.registry.register_processor(BoxProcessor::new(FnProcessor::new(
            "drop-all",
            ProcessorKind::Filter,
            |_m| async { Ok(ProcessOutcome::Drop) },
        )));
        d.registry.create_route(Route::new(
            "r1",
            "r1",
            "src://in",
            vec!["sink://out".into()],
            vec!["drop-all".into()],
        ));

        d.process(envelope::new("src://in", json!(null), 0)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(d.registry.route_metrics("r1").unwrap().messages_processed, 1);
    }

    #[tokio::test]
    async fn splitter_delivers_each_part() {
        let (d, _scheduler) = dispatcher();
        let seen = recording_sink(&d, "out", "sink://out");
        d.registry.register_processor(BoxProcessor::new(FnProcessor::new(
            "split",
            ProcessorKind::Splitter,
            |m: Message| async move {
                let parts = (0..3)
                    .map(|i| {
                        let mut part = m.clone();
                        part.body = json!(i);
                        part
                    })
                    .collect();
                Ok(ProcessOutcome::ForwardMany(parts))
            },
        )));
        d.registry.create_route(Route::new(
            "r1",
            "r1",
            "src://in",
            vec!["sink://out".into()],
            vec!["split".into()],
        ));

        d.process(envelope::new("src://in", json!(null), 0)).await;
        let bodies: Vec<_> = seen.lock().unwrap().iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn error_handler_route_receives_wrapped_error() {
        let (d, _scheduler) = dispatcher();
        failing_sink(&d, "db", "db://orders");
        let errors = recording_sink(&d, "errors", "sink://errors");

        let mut main = Route::new("main", "main", "src://in", vec!["db://orders".into()], vec![]);
        main.error_handler = Some("on-error".into());
        d.registry.create_route(main);
        d.registry.create_route(Route::new(
            "on-error",
            "on-error",
            "error://main",
            vec!["sink://errors".into()],
            vec![],
        ));

        let original = envelope::new("src://in", json!({"order": 9}), 0);
        d.process(original.clone()).await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "error://main");
        assert_eq!(errors[0].body["originalMessage"]["id"], json!(original.id));
        assert!(
            errors[0].body["error"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
        // The original still follows the retry path
        assert_eq!(d.dead_letters.len(), 1);
    }

    #[tokio::test]
    async fn endpoint_error_handler_is_invoked() {
        let (d, _scheduler) = dispatcher();
        let errors = recording_sink(&d, "errors", "sink://errors");
        let mut flaky = Endpoint::new("flaky", EndpointRole::Sink, "Flaky", "http://flaky");
        flaky.error_handler = Some("flaky-errors".into());
        d.registry.register_endpoint(
            flaky,
            Some(BoxDeliverer::new(FnDeliverer::new(|_ep, _msg| async {
                Err::<(), _>(anyhow::anyhow!("503"))
            }))),
        );
        d.registry
            .create_route(Route::new("main", "main", "src://in", vec!["http://flaky".into()], vec![]));
        d.registry.create_route(Route::new(
            "flaky-errors",
            "flaky-errors",
            "error://main",
            vec!["sink://errors".into()],
            vec![],
        ));

        d.process(envelope::new("src://in", json!(null), 0)).await;
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_endpoint_fails_delivery() {
        let (d, _scheduler) = dispatcher();
        let mut ep = Endpoint::new("off", EndpointRole::Sink, "Off", "sink://off");
        ep.enabled = false;
        d.registry.register_endpoint(ep, None);
        d.registry
            .create_route(Route::new("r1", "r1", "src://in", vec!["sink://off".into()], vec![]));

        d.process(envelope::new("src://in", json!(null), 0)).await;
        let entries = d.dead_letters.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].reason.contains("endpoint 'off' is disabled"));
    }

    #[tokio::test]
    async fn notification_only_endpoint_counts_as_delivered() {
        let (d, _scheduler) = dispatcher();
        let mut events = d.events.subscribe();
        d.registry.register_endpoint(
            Endpoint::new("notify", EndpointRole::Sink, "Notify", "sink://notify"),
            None,
        );
        d.registry
            .create_route(Route::new("r1", "r1", "src://in", vec!["sink://notify".into()], vec![]));

        d.process(envelope::new("src://in", json!(null), 0)).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            BusEvent::MessageDelivered { endpoint_id, .. } if endpoint_id == "notify"
        ));
    }

    #[tokio::test]
    async fn open_circuit_skips_deliverer() {
        let (d, _scheduler) = dispatcher();
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        d.registry.register_endpoint(
            Endpoint::new("db", EndpointRole::Sink, "DB", "db://orders"),
            Some(BoxDeliverer::new(FnDeliverer::new(move |_ep, _msg| {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<(), _>(anyhow::anyhow!("down"))
                }
            }))),
        );
        d.breakers.register(
            "db",
            Some(CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout_ms: 60_000,
                monitoring_period_ms: 1_000,
            }),
        );
        d.registry
            .create_route(Route::new("r1", "r1", "src://in", vec!["db://orders".into()], vec![]));

        d.process(envelope::new("src://in", json!(null), 0)).await;
        d.process(envelope::new("src://in", json!(null), 0)).await;

        assert_eq!(*calls.lock().unwrap(), 1);
        let reasons: Vec<String> = d.dead_letters.entries().into_iter().map(|e| e.reason).collect();
        assert!(reasons[1].contains("circuit for endpoint 'db' is open"));
    }
}
