//! Sequential saga executor with best-effort compensation.
//!
//! Steps run strictly in declaration order. The first failing step stops the
//! execution, compensation runs according to the configured
//! [`CompensationScope`], and the original error is returned together with the
//! final context.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use switchyard_types::config::SagaConfig;
use switchyard_types::event::BusEvent;
use switchyard_types::saga::{CompensationScope, SagaContext};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::definition::{SagaDefinition, SagaStep, SharedAction, SharedContext, shared_context};
use crate::event::EventBus;

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga definition '{0}' not found")]
    NotFound(String),

    #[error("saga definition '{0}' has no steps")]
    EmptyDefinition(String),

    #[error("step '{step_id}' failed: {error:#}")]
    StepFailed {
        step_id: String,
        error: anyhow::Error,
    },

    #[error("step '{step_id}' timed out after {timeout:?}")]
    StepTimeout { step_id: String, timeout: Duration },
}

impl SagaError {
    /// The failing step, for step-level errors.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            SagaError::StepFailed { step_id, .. } | SagaError::StepTimeout { step_id, .. } => {
                Some(step_id)
            }
            _ => None,
        }
    }
}

/// Result of a saga whose steps all succeeded.
#[derive(Debug, Clone)]
pub struct SagaOutcome {
    pub context: SagaContext,
    /// Each step's action result keyed by step ID.
    pub results: HashMap<String, Value>,
}

/// A failed saga: the original error plus the context after compensation.
#[derive(Debug, Error)]
#[error("saga '{}' failed: {error}", .context.definition_id)]
pub struct SagaFailure {
    #[source]
    pub error: SagaError,
    pub context: SagaContext,
}

pub struct SagaOrchestrator {
    definitions: DashMap<String, SagaDefinition>,
    scope: CompensationScope,
    events: Option<EventBus>,
}

impl SagaOrchestrator {
    pub fn new(config: &SagaConfig) -> Self {
        Self {
            definitions: DashMap::new(),
            scope: config.compensation_scope,
            events: None,
        }
    }

    pub fn with_events(config: &SagaConfig, events: EventBus) -> Self {
        Self {
            events: Some(events),
            ..Self::new(config)
        }
    }

    pub fn compensation_scope(&self) -> CompensationScope {
        self.scope
    }

    /// Register a definition, replacing any with the same ID.
    pub fn create_saga(&self, definition: SagaDefinition) -> Result<(), SagaError> {
        if definition.steps.is_empty() {
            return Err(SagaError::EmptyDefinition(definition.id));
        }

        info!(
            definition_id = %definition.id,
            steps = definition.steps.len(),
            "saga created"
        );
        self.publish(BusEvent::SagaCreated {
            definition_id: definition.id.clone(),
            steps: definition.steps.len(),
        });
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn definition(&self, id: &str) -> Option<SagaDefinition> {
        self.definitions.get(id).map(|d| d.value().clone())
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }

    /// Execute a registered saga with the given initial variables.
    pub async fn execute_saga(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
        correlation_id: Option<String>,
    ) -> Result<SagaOutcome, SagaFailure> {
        let mut initial = SagaContext::new(definition_id, correlation_id);
        initial.variables.extend(variables);

        let Some(definition) = self.definition(definition_id) else {
            return Err(SagaFailure {
                error: SagaError::NotFound(definition_id.to_string()),
                context: initial,
            });
        };

        let saga_id = initial.saga_id;
        let shared = shared_context(initial);
        let deadline = definition.timeout.map(|t| Instant::now() + t);
        info!(%saga_id, %definition_id, steps = definition.steps.len(), "saga started");

        for step in &definition.steps {
            debug!(%saga_id, step_id = %step.id, "saga step started");
            match self.run_step(&definition, step, &shared, deadline).await {
                Ok(result) => {
                    debug!(%saga_id, step_id = %step.id, "saga step completed");
                    shared.lock().await.record_completed(&step.id, result);
                }
                Err(error) => {
                    warn!(%saga_id, step_id = %step.id, error = %error, "saga step failed");
                    shared.lock().await.record_failed(&step.id);
                    self.compensate(&definition, &shared).await;

                    self.publish(BusEvent::SagaFailed {
                        saga_id,
                        definition_id: definition.id.clone(),
                        failed_step: step.id.clone(),
                        error: error.to_string(),
                    });
                    let context = shared.lock().await.clone();
                    return Err(SagaFailure { error, context });
                }
            }
        }

        let context = shared.lock().await.clone();
        let duration_ms = (Utc::now() - context.start_time).num_milliseconds().max(0) as u64;
        let results: HashMap<String, Value> = context
            .completed_steps
            .iter()
            .filter_map(|id| context.variables.get(id).map(|v| (id.clone(), v.clone())))
            .collect();

        info!(%saga_id, %definition_id, duration_ms, "saga completed");
        self.publish(BusEvent::SagaCompleted {
            saga_id,
            definition_id: definition.id.clone(),
            duration_ms,
            steps_completed: context.completed_steps.len(),
        });

        Ok(SagaOutcome { context, results })
    }

    /// Run one step, re-attempting up to `definition.retries` extra times.
    async fn run_step(
        &self,
        definition: &SagaDefinition,
        step: &SagaStep,
        context: &SharedContext,
        deadline: Option<Instant>,
    ) -> Result<Value, SagaError> {
        let attempts = definition.retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            let timeout = effective_timeout(step.timeout, deadline);
            match run_action(&step.id, &step.action, context.clone(), timeout).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let past_deadline = deadline.is_some_and(|d| Instant::now() >= d);
                    if attempt >= attempts || past_deadline {
                        return Err(error);
                    }
                    debug!(
                        step_id = %step.id,
                        attempt,
                        max_attempts = attempts,
                        error = %error,
                        "retrying saga step"
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// Best-effort sweep. Failures and timeouts are logged, never propagated.
    async fn compensate(&self, definition: &SagaDefinition, context: &SharedContext) {
        let (saga_id, order) = {
            let ctx = context.lock().await;
            let order: Vec<String> = compensation_order(self.scope, &ctx)
                .into_iter()
                .map(str::to_string)
                .collect();
            (ctx.saga_id, order)
        };

        for step_id in &order {
            let step_id = step_id.as_str();
            let step = definition.step_by_id(step_id);
            let handler = definition
                .compensation_steps
                .get(step_id)
                .cloned()
                .or_else(|| match self.scope {
                    CompensationScope::CompletedAndFailed => {
                        step.and_then(|s| s.compensation.clone())
                    }
                    CompensationScope::FailedStepOnly => None,
                });

            let Some(handler) = handler else {
                debug!(%step_id, "no compensation registered");
                continue;
            };

            let timeout = step.and_then(|s| s.timeout);
            match run_action(step_id, &handler, context.clone(), timeout).await {
                Ok(_) => info!(%saga_id, %step_id, "compensation completed"),
                Err(error) => warn!(
                    %saga_id,
                    %step_id,
                    error = %error,
                    "compensation failed"
                ),
            }
        }
    }

    fn publish(&self, event: BusEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("definitions", &self.definitions.len())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Step IDs to compensate, most recent first.
fn compensation_order(scope: CompensationScope, context: &SagaContext) -> Vec<&str> {
    let failed = context.failed_steps.iter().rev();
    match scope {
        CompensationScope::FailedStepOnly => failed.map(String::as_str).collect(),
        CompensationScope::CompletedAndFailed => failed
            .chain(context.completed_steps.iter().rev())
            .map(String::as_str)
            .collect(),
    }
}

/// The step timeout capped by whatever remains of the saga deadline.
fn effective_timeout(step: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
    match (step, remaining) {
        (Some(s), Some(r)) => Some(s.min(r)),
        (s, r) => s.or(r),
    }
}

async fn run_action(
    step_id: &str,
    action: &SharedAction,
    context: SharedContext,
    timeout: Option<Duration>,
) -> Result<Value, SagaError> {
    let fut = action.call(context);
    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
            SagaError::StepTimeout {
                step_id: step_id.to_string(),
                timeout,
            }
        })?,
        None => fut.await,
    };
    result.map_err(|error| SagaError::StepFailed {
        step_id: step_id.to_string(),
        error,
    })
}
