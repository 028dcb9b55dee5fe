//! Saga execution state.
//!
//! `SagaContext` is owned by exactly one in-flight saga execution and is
//! discarded once the execution completes or fails.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which steps are compensated after a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationScope {
    /// Only the failed step's handler from the saga's compensation map runs.
    #[default]
    FailedStepOnly,
    /// The failed step, then completed steps in reverse order.
    CompletedAndFailed,
}

/// Mutable state threaded through one saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaContext {
    /// Execution ID, fresh per `execute_saga` call.
    pub saga_id: Uuid,
    /// ID of the `SagaDefinition` being executed.
    pub definition_id: String,
    pub correlation_id: Option<String>,
    /// Step results keyed by step ID, plus caller-supplied inputs.
    pub variables: HashMap<String, Value>,
    /// Step IDs that completed, in execution order.
    pub completed_steps: Vec<String>,
    /// Step IDs that failed, in execution order.
    pub failed_steps: Vec<String>,
    pub start_time: DateTime<Utc>,
}

impl SagaContext {
    pub fn new(definition_id: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            saga_id: Uuid::now_v7(),
            definition_id: definition_id.into(),
            correlation_id,
            variables: HashMap::new(),
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            start_time: Utc::now(),
        }
    }

    /// Record a successful step and store its result under the step ID.
    pub fn record_completed(&mut self, step_id: &str, result: Value) {
        self.variables.insert(step_id.to_string(), result);
        self.completed_steps.push(step_id.to_string());
    }

    pub fn record_failed(&mut self, step_id: &str) {
        self.failed_steps.push(step_id.to_string());
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_completed_stores_result() {
        let mut ctx = SagaContext::new("order", Some("corr-1".into()));
        ctx.record_completed("reserve", json!({"reservation": 7}));
        ctx.record_completed("charge", json!(true));

        assert_eq!(ctx.completed_steps, vec!["reserve", "charge"]);
        assert_eq!(ctx.variable("reserve"), Some(&json!({"reservation": 7})));
        assert!(ctx.failed_steps.is_empty());
    }

    #[test]
    fn test_each_context_gets_fresh_id() {
        let a = SagaContext::new("order", None);
        let b = SagaContext::new("order", None);
        assert_ne!(a.saga_id, b.saga_id);
    }

    #[test]
    fn test_compensation_scope_serde() {
        let scope: CompensationScope = serde_json::from_str("\"completed_and_failed\"").unwrap();
        assert_eq!(scope, CompensationScope::CompletedAndFailed);
        assert_eq!(CompensationScope::default(), CompensationScope::FailedStepOnly);
    }
}
