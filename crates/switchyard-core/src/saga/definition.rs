//! Saga definitions: ordered steps with optional compensations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use switchyard_types::saga::SagaContext;
use tokio::sync::Mutex;

/// Live context of one saga execution, shared by its steps and compensations.
///
/// Writes made by an action (for example `ctx.lock().await.variables.insert(..)`)
/// are visible to every later step and end up in the returned context. Do not
/// hold the guard past the end of the action.
pub type SharedContext = Arc<Mutex<SagaContext>>;

pub fn shared_context(context: SagaContext) -> SharedContext {
    Arc::new(Mutex::new(context))
}

/// A step action or compensation.
///
/// The value it returns is stored under the step ID by the orchestrator.
pub trait SagaAction: Send + Sync {
    fn call(&self, context: SharedContext) -> BoxFuture<'static, anyhow::Result<Value>>;
}

impl<F, Fut> SagaAction for F
where
    F: Fn(SharedContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, context: SharedContext) -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin(self(context))
    }
}

pub type SharedAction = Arc<dyn SagaAction>;

/// Wrap a closure as a shareable action.
pub fn action<F, Fut>(f: F) -> SharedAction
where
    F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
pub struct SagaStep {
    pub id: String,
    pub name: String,
    pub action: SharedAction,
    /// Step-attached compensation. Only used with
    /// `CompensationScope::CompletedAndFailed` when the saga-level map has
    /// no handler for this step.
    pub compensation: Option<SharedAction>,
    pub timeout: Option<Duration>,
}

impl SagaStep {
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::from_action(id, action(f))
    }

    /// Build a step from an existing (possibly trait-object) action.
    pub fn from_action(id: impl Into<String>, action: SharedAction) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action,
            compensation: None,
            timeout: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_compensation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.compensation = Some(action(f));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_compensation", &self.compensation.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct SagaDefinition {
    pub id: String,
    pub name: String,
    /// Executed strictly in order.
    pub steps: Vec<SagaStep>,
    /// Compensation handlers keyed by step ID.
    pub compensation_steps: HashMap<String, SharedAction>,
    /// Deadline for the whole execution. Caps every step timeout.
    pub timeout: Option<Duration>,
    /// Extra attempts for a failing step action before the step fails.
    pub retries: u32,
}

impl SagaDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            compensation_steps: HashMap::new(),
            timeout: None,
            retries: 0,
        }
    }

    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Register the compensation run when `step_id` fails.
    pub fn compensate<F, Fut>(mut self, step_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.compensation_steps.insert(step_id.into(), action(f));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn step_by_id(&self, id: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

impl std::fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut compensated: Vec<&String> = self.compensation_steps.keys().collect();
        compensated.sort();
        f.debug_struct("SagaDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("compensation_steps", &compensated)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_is_an_action() {
        let step = SagaStep::new("reserve", |ctx: SharedContext| async move {
            let mut ctx = ctx.lock().await;
            ctx.variables.insert("reservation".into(), json!("R-1"));
            Ok(json!({ "definition": ctx.definition_id }))
        });
        let ctx = shared_context(SagaContext::new("checkout", None));
        let value = step.action.call(ctx.clone()).await.unwrap();
        assert_eq!(value, json!({ "definition": "checkout" }));
        assert_eq!(step.name, "reserve");
        assert_eq!(ctx.lock().await.variable("reservation"), Some(&json!("R-1")));
    }

    #[test]
    fn builder_collects_steps_and_compensations() {
        let def = SagaDefinition::new("checkout", "Checkout")
            .step(SagaStep::new("a", |_| async { Ok(json!(1)) }).named("Step A"))
            .step(
                SagaStep::new("b", |_| async { Ok(json!(2)) })
                    .with_timeout(Duration::from_secs(1)),
            )
            .compensate("b", |_| async { Ok(Value::Null) })
            .with_retries(2);

        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.step_by_id("a").unwrap().name, "Step A");
        assert_eq!(
            def.step_by_id("b").unwrap().timeout,
            Some(Duration::from_secs(1))
        );
        assert!(def.compensation_steps.contains_key("b"));
        assert_eq!(def.retries, 2);
        assert!(def.step_by_id("c").is_none());
    }
}
