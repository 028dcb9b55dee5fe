//! Observability for Switchyard: subscriber setup and lifecycle-event logging.

pub mod event_log;
pub mod tracing_setup;

pub use event_log::spawn_event_logger;
pub use tracing_setup::{init_tracing, shutdown_tracing};
