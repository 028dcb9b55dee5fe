//! Named circuit breakers guarding calls to external resources.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use switchyard_types::circuit::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
use switchyard_types::event::BusEvent;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::breaker::{Admission, CircuitBreaker, Transition};
use crate::event::EventBus;

/// Error returned by [`CircuitBreakerRegistry::execute`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit rejected the call without running it.
    #[error("circuit '{name}' is open, next attempt in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    /// The call ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

/// Registry of breakers keyed by name.
///
/// Calls under an unregistered name run unprotected.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<Mutex<CircuitBreaker>>>,
    defaults: CircuitBreakerConfig,
    events: Option<EventBus>,
    /// Wakes the monitor so it picks up a new breaker's monitoring period.
    registered: Notify,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            events: None,
            registered: Notify::new(),
        }
    }

    /// Like [`new`](Self::new), publishing `CircuitStateChanged` on `events`.
    pub fn with_events(defaults: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            events: Some(events),
            ..Self::new(defaults)
        }
    }

    /// Register (or replace) a breaker. `None` uses the registry defaults.
    pub fn register(&self, name: impl Into<String>, config: Option<CircuitBreakerConfig>) {
        let name = name.into();
        let config = config.unwrap_or(self.defaults);
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            "circuit breaker registered"
        );
        self.breakers.insert(
            name.clone(),
            Arc::new(Mutex::new(CircuitBreaker::new(name, config))),
        );
        self.registered.notify_one();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    /// Run `op` under the breaker named `name`.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(breaker) = self.breaker(name) else {
            return op().await.map_err(CircuitError::Inner);
        };

        let (admission, transition) = lock(&breaker).try_acquire(Instant::now());
        self.report(name, transition);

        if let Admission::Rejected { retry_in } = admission {
            debug!(breaker = %name, ?retry_in, "call rejected by open circuit");
            return Err(CircuitError::Open {
                name: name.to_string(),
                retry_in,
            });
        }

        let mut guard = TrialGuard {
            breaker: &breaker,
            armed: admission == Admission::Trial,
        };
        let result = op().await;
        guard.armed = false;

        let transition = {
            let mut b = lock(&breaker);
            match &result {
                Ok(_) => b.record_success(admission),
                Err(_) => b.record_failure(admission, Instant::now()),
            }
        };
        self.report(name, transition);

        result.map_err(CircuitError::Inner)
    }

    pub fn snapshot(&self, name: &str) -> Option<CircuitBreakerSnapshot> {
        self.breaker(name).map(|b| lock(&b).snapshot())
    }

    /// All breakers, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut all: Vec<CircuitBreakerSnapshot> = self
            .breakers
            .iter()
            .map(|e| lock(e.value()).snapshot())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Force a breaker closed. Returns `false` if it is not registered.
    pub fn reset(&self, name: &str) -> bool {
        let Some(breaker) = self.breaker(name) else {
            return false;
        };
        let transition = lock(&breaker).reset();
        self.report(name, transition);
        true
    }

    /// One monitor pass: move every expired Open breaker to HalfOpen.
    ///
    /// Returns the number of breakers that changed state.
    pub fn poll_recoveries(&self) -> usize {
        let now = Instant::now();
        let breakers: Vec<(String, Arc<Mutex<CircuitBreaker>>)> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut changed = 0;
        for (name, breaker) in breakers {
            let transition = lock(&breaker).poll_recovery(now);
            if transition.is_some() {
                changed += 1;
            }
            self.report(&name, transition);
        }
        changed
    }

    /// Shortest monitoring period among registered breakers and the defaults.
    pub fn monitor_period(&self) -> Duration {
        self.breakers
            .iter()
            .map(|e| lock(e.value()).config().monitoring_period())
            .fold(self.defaults.monitoring_period(), Duration::min)
            .max(Duration::from_millis(1))
    }

    /// Spawn the periodic recovery monitor.
    ///
    /// Polls at [`monitor_period`](Self::monitor_period), re-read after every
    /// pass and whenever a breaker is registered, and stops when `token` is
    /// cancelled.
    pub fn spawn_monitor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut period = registry.monitor_period();
            let mut next = Instant::now() + period;
            debug!(?period, "circuit monitor started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next) => {
                        registry.poll_recoveries();
                        period = registry.monitor_period();
                        next = Instant::now() + period;
                    }
                    _ = registry.registered.notified() => {
                        period = registry.monitor_period();
                        next = next.min(Instant::now() + period);
                        debug!(?period, "circuit monitor period updated");
                    }
                }
            }
            debug!("circuit monitor stopped");
        })
    }

    fn breaker(&self, name: &str) -> Option<Arc<Mutex<CircuitBreaker>>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    fn report(&self, name: &str, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => warn!(breaker = %name, %from, %to, "circuit opened"),
            _ => info!(breaker = %name, %from, %to, "circuit state changed"),
        }
        if let Some(events) = &self.events {
            events.publish(BusEvent::CircuitStateChanged {
                name: name.to_string(),
                from,
                to,
            });
        }
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Releases the half-open trial slot if the trial future is dropped early.
struct TrialGuard<'a> {
    breaker: &'a Mutex<CircuitBreaker>,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.breaker).release_trial();
        }
    }
}

fn lock(breaker: &Mutex<CircuitBreaker>) -> MutexGuard<'_, CircuitBreaker> {
    breaker.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_ms: 50,
            monitoring_period_ms: 10,
        }
    }

    async fn fail(registry: &CircuitBreakerRegistry, name: &str) -> CircuitError<String> {
        registry
            .execute(name, || async { Err::<(), _>("boom".to_string()) })
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn unregistered_name_runs_unprotected() {
        let registry = CircuitBreakerRegistry::new(fast_config(1));
        for _ in 0..5 {
            assert!(!fail(&registry, "nobody").await.is_open());
        }
        let ok: Result<u32, CircuitError<String>> =
            registry.execute("nobody", || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert!(registry.snapshot("nobody").is_none());
    }

    #[tokio::test]
    async fn opens_and_rejects_without_running() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        registry.register("db", Some(fast_config(2)));

        assert!(matches!(fail(&registry, "db").await, CircuitError::Inner(_)));
        assert!(matches!(fail(&registry, "db").await, CircuitError::Inner(_)));
        assert_eq!(registry.snapshot("db").unwrap().state, CircuitState::Open);

        let mut ran = false;
        let result: Result<(), CircuitError<String>> = registry
            .execute("db", || {
                ran = true;
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().is_open());
        assert!(!ran);
    }

    #[tokio::test]
    async fn recovers_after_timeout() {
        let registry = CircuitBreakerRegistry::new(fast_config(1));
        registry.register("api", None);
        fail(&registry, "api").await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        let result: Result<(), CircuitError<String>> =
            registry.execute("api", || async { Ok(()) }).await;
        assert!(result.is_ok());

        let snap = registry.snapshot("api").unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let registry = CircuitBreakerRegistry::with_events(fast_config(1), events);
        registry.register("queue", None);

        fail(&registry, "queue").await;
        match rx.recv().await.unwrap() {
            BusEvent::CircuitStateChanged { name, from, to } => {
                assert_eq!(name, "queue");
                assert_eq!(from, CircuitState::Closed);
                assert_eq!(to, CircuitState::Open);
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(registry.reset("queue"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::CircuitStateChanged {
                to: CircuitState::Closed,
                ..
            }
        ));
        assert!(!registry.reset("missing"));
    }

    #[tokio::test]
    async fn monitor_moves_open_to_half_open() {
        let registry = Arc::new(CircuitBreakerRegistry::new(fast_config(1)));
        registry.register("svc", None);
        fail(&registry, "svc").await;

        let token = CancellationToken::new();
        let handle = registry.spawn_monitor(token.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            registry.snapshot("svc").unwrap().state,
            CircuitState::HalfOpen
        );

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn monitor_picks_up_breakers_registered_later() {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let token = CancellationToken::new();
        let handle = registry.spawn_monitor(token.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.register(
            "late",
            Some(CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout_ms: 20,
                monitoring_period_ms: 10,
            }),
        );
        assert_eq!(registry.monitor_period(), Duration::from_millis(10));
        fail(&registry, "late").await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            registry.snapshot("late").unwrap().state,
            CircuitState::HalfOpen
        );

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn snapshots_sorted_by_name() {
        let registry = CircuitBreakerRegistry::new(fast_config(3));
        registry.register("zeta", None);
        registry.register("alpha", None);
        let names: Vec<String> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
