//! Delivery capability: hands a processed message to a destination endpoint.
//!
//! Concrete database/queue/HTTP adapters live outside this crate and plug in
//! by implementing [`Deliverer`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use switchyard_types::endpoint::Endpoint;
use switchyard_types::message::Message;

/// Delivers messages to an endpoint. May fail; failures enter the retry path.
pub trait Deliverer: Send + Sync {
    fn deliver(
        &self,
        endpoint: &Endpoint,
        message: &Message,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Object-safe version of [`Deliverer`] with boxed futures.
pub trait DelivererDyn: Send + Sync {
    fn deliver_boxed<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

impl<T: Deliverer> DelivererDyn for T {
    fn deliver_boxed<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self.deliver(endpoint, message))
    }
}

/// Type-erased, cheaply cloneable deliverer handle.
#[derive(Clone)]
pub struct BoxDeliverer {
    inner: Arc<dyn DelivererDyn>,
}

impl BoxDeliverer {
    pub fn new<T: Deliverer + 'static>(deliverer: T) -> Self {
        Self {
            inner: Arc::new(deliverer),
        }
    }

    pub async fn deliver(&self, endpoint: &Endpoint, message: &Message) -> anyhow::Result<()> {
        self.inner.deliver_boxed(endpoint, message).await
    }
}

impl std::fmt::Debug for BoxDeliverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDeliverer").finish_non_exhaustive()
    }
}

/// Deliverer backed by a closure receiving owned copies of its arguments.
pub struct FnDeliverer<F> {
    f: F,
}

impl<F, Fut> FnDeliverer<F>
where
    F: Fn(Endpoint, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Deliverer for FnDeliverer<F>
where
    F: Fn(Endpoint, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn deliver(
        &self,
        endpoint: &Endpoint,
        message: &Message,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self.f)(endpoint.clone(), message.clone())
    }
}
