//! Message routing runtime.
//!
//! - `bus` -- `MessageBus` facade: registration, enqueue, task lifecycle
//! - `dispatcher` -- single-consumer loop running routes and failure handling
//! - `registry` -- endpoint, route and processor lookup tables
//! - `processor` / `delivery` -- pluggable pipeline and delivery capabilities
//! - `retry` -- exponential backoff and the delayed re-enqueue scheduler
//! - `dead_letter` -- terminal store for expired and exhausted messages
//! - `envelope` -- helper constructors for `Message`

pub mod bus;
pub mod dead_letter;
pub mod delivery;
pub mod dispatcher;
pub mod envelope;
pub mod processor;
pub mod registry;
pub mod retry;

pub use bus::{BusError, BusHandle, MessageBus};
pub use dead_letter::{DeadLetterEntry, DeadLetterStore};
pub use delivery::{BoxDeliverer, Deliverer, FnDeliverer};
pub use dispatcher::DispatchError;
pub use processor::{BoxProcessor, FnProcessor, ProcessOutcome, Processor};
pub use registry::{RegisteredEndpoint, Registry};
