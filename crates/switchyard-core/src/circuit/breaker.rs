//! Circuit breaker state machine for a single named resource.
//!
//! Closed -> Open after `failure_threshold` consecutive failures. Open rejects
//! calls until `recovery_timeout` has elapsed; the next call (or the monitor)
//! moves the breaker to HalfOpen, which admits exactly one trial call.
//! Trial success closes the circuit, trial failure re-opens it. Results of
//! calls admitted while Closed only count toward the Closed threshold.

use std::time::Duration;

use chrono::{DateTime, Utc};
use switchyard_types::circuit::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Normal operation. Tracks consecutive failures toward threshold.
    Closed { consecutive_failures: u32 },
    /// Calls are rejected until `next_attempt`.
    Open { next_attempt: Instant },
    /// Recovery probe. At most one trial call is in flight.
    HalfOpen { trial_in_flight: bool },
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit: normal call.
    Allowed,
    /// Half-open circuit: this call is the single recovery trial.
    Trial,
    /// Open circuit (or a trial is already running).
    Rejected { retry_in: Duration },
}

/// A state change worth reporting.
pub type Transition = (CircuitState, CircuitState);

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    phase: Phase,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            phase: Phase::Closed {
                consecutive_failures: 0,
            },
            failure_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Decide whether a call may proceed, claiming the trial slot if the
    /// breaker is (or becomes) half-open.
    pub fn try_acquire(&mut self, now: Instant) -> (Admission, Option<Transition>) {
        match self.phase {
            Phase::Closed { .. } => (Admission::Allowed, None),
            Phase::Open { next_attempt } => {
                if now >= next_attempt {
                    self.phase = Phase::HalfOpen {
                        trial_in_flight: true,
                    };
                    (
                        Admission::Trial,
                        Some((CircuitState::Open, CircuitState::HalfOpen)),
                    )
                } else {
                    (
                        Admission::Rejected {
                            retry_in: next_attempt - now,
                        },
                        None,
                    )
                }
            }
            Phase::HalfOpen {
                trial_in_flight: false,
            } => {
                self.phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                (Admission::Trial, None)
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => (
                Admission::Rejected {
                    retry_in: Duration::ZERO,
                },
                None,
            ),
        }
    }

    /// Record a successful call admitted as `admission`.
    ///
    /// Only the half-open trial closes the circuit. A success from a call
    /// admitted while Closed that finishes after the circuit opened is ignored.
    pub fn record_success(&mut self, admission: Admission) -> Option<Transition> {
        match (self.phase, admission) {
            (Phase::Closed { .. }, _) => {
                self.close();
                None
            }
            (Phase::HalfOpen { .. }, Admission::Trial) => {
                self.close();
                Some((CircuitState::HalfOpen, CircuitState::Closed))
            }
            _ => None,
        }
    }

    /// Record a failed call admitted as `admission`.
    pub fn record_failure(&mut self, admission: Admission, now: Instant) -> Option<Transition> {
        self.last_failure_time = Some(Utc::now());

        match self.phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                let new_count = consecutive_failures + 1;
                self.failure_count = new_count;
                if new_count >= self.config.failure_threshold {
                    self.open(now);
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    self.phase = Phase::Closed {
                        consecutive_failures: new_count,
                    };
                    None
                }
            }
            Phase::HalfOpen { .. } if admission == Admission::Trial => {
                // Probe failed, reopen the circuit
                self.failure_count += 1;
                self.open(now);
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            Phase::HalfOpen { .. } | Phase::Open { .. } => {
                // A call admitted before the circuit opened finished late
                self.failure_count += 1;
                None
            }
        }
    }

    /// Give back an unused trial slot (the trial call was abandoned).
    pub fn release_trial(&mut self) {
        if let Phase::HalfOpen {
            trial_in_flight: true,
        } = self.phase
        {
            self.phase = Phase::HalfOpen {
                trial_in_flight: false,
            };
        }
    }

    /// Monitor hook: flip an expired Open breaker to HalfOpen without traffic.
    pub fn poll_recovery(&mut self, now: Instant) -> Option<Transition> {
        match self.phase {
            Phase::Open { next_attempt } if now >= next_attempt => {
                self.phase = Phase::HalfOpen {
                    trial_in_flight: false,
                };
                Some((CircuitState::Open, CircuitState::HalfOpen))
            }
            _ => None,
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&mut self) -> Option<Transition> {
        let from = self.state();
        self.close();
        (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            next_attempt_time: match self.phase {
                Phase::Open { .. } => self.next_attempt_time,
                _ => None,
            },
        }
    }

    fn close(&mut self) {
        self.phase = Phase::Closed {
            consecutive_failures: 0,
        };
        self.failure_count = 0;
        self.next_attempt_time = None;
    }

    fn open(&mut self, now: Instant) {
        let timeout = self.config.recovery_timeout();
        self.phase = Phase::Open {
            next_attempt: now + timeout,
        };
        self.next_attempt_time = chrono::Duration::from_std(timeout)
            .ok()
            .map(|d| Utc::now() + d);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
