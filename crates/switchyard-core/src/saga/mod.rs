//! Saga orchestration: sequential multi-step operations with compensation.

pub mod definition;
pub mod orchestrator;

pub use definition::{
    SagaAction, SagaDefinition, SagaStep, SharedAction, SharedContext, action, shared_context,
};
pub use orchestrator::{SagaError, SagaFailure, SagaOrchestrator, SagaOutcome};
