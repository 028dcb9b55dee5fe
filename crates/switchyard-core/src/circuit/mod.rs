//! Circuit breakers for calls to external resources.

pub mod breaker;
pub mod registry;

pub use breaker::{Admission, CircuitBreaker};
pub use registry::{CircuitBreakerRegistry, CircuitError};
