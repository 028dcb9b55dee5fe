//! Runtime for Switchyard: message routing, retries, sagas and circuit breakers.
//!
//! Depends only on `switchyard-types` plus the async runtime. Concrete
//! delivery adapters, processors and saga actions plug in through the
//! capability traits in [`message`] and [`saga`].

pub mod circuit;
pub mod event;
pub mod message;
pub mod saga;
