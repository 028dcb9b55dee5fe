//! Processor capability for route pipelines.
//!
//! A processor receives one message and returns a tagged outcome:
//! forward it (possibly transformed), split it into several messages, or drop
//! it for the current route.
//!
//! Follows the same blanket-impl pattern as the other plugin seams:
//! 1. `Processor` uses RPITIT for ergonomic implementations
//! 2. `ProcessorDyn` is the object-safe twin with boxed futures
//! 3. `BoxProcessor` wraps `Arc<dyn ProcessorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use switchyard_types::message::Message;
use switchyard_types::route::ProcessorKind;

/// Result of running one processor.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Pass the (possibly transformed) message to the next processor.
    Forward(Message),
    /// Split: each message is delivered independently and the pipeline stops.
    ForwardMany(Vec<Message>),
    /// Drop the message for this route only.
    Drop,
}

/// A single step in a route's pipeline.
pub trait Processor: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> ProcessorKind;

    fn process(
        &self,
        message: Message,
    ) -> impl Future<Output = anyhow::Result<ProcessOutcome>> + Send;
}

/// Object-safe version of [`Processor`] with boxed futures.
pub trait ProcessorDyn: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> ProcessorKind;

    fn process_boxed(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProcessOutcome>> + Send + '_>>;
}

impl<T: Processor> ProcessorDyn for T {
    fn id(&self) -> &str {
        Processor::id(self)
    }

    fn kind(&self) -> ProcessorKind {
        Processor::kind(self)
    }

    fn process_boxed(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProcessOutcome>> + Send + '_>> {
        Box::pin(self.process(message))
    }
}

/// Type-erased, cheaply cloneable processor handle stored in the registry.
#[derive(Clone)]
pub struct BoxProcessor {
    inner: Arc<dyn ProcessorDyn>,
}

impl BoxProcessor {
    pub fn new<T: Processor + 'static>(processor: T) -> Self {
        Self {
            inner: Arc::new(processor),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn kind(&self) -> ProcessorKind {
        self.inner.kind()
    }

    pub async fn process(&self, message: Message) -> anyhow::Result<ProcessOutcome> {
        self.inner.process_boxed(message).await
    }
}

impl std::fmt::Debug for BoxProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxProcessor")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Processor backed by a closure.
pub struct FnProcessor<F> {
    id: String,
    kind: ProcessorKind,
    f: F,
}

impl<F, Fut> FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ProcessOutcome>> + Send,
{
    pub fn new(id: impl Into<String>, kind: ProcessorKind, f: F) -> Self {
        Self {
            id: id.into(),
            kind,
            f,
        }
    }
}

impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ProcessOutcome>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProcessorKind {
        self.kind
    }

    fn process(
        &self,
        message: Message,
    ) -> impl Future<Output = anyhow::Result<ProcessOutcome>> + Send {
        (self.f)(message)
    }
}
