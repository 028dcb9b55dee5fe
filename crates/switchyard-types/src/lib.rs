//! Shared domain types for Switchyard.
//!
//! This crate contains the data model used across the Switchyard message bus:
//! Message, Endpoint, Route, saga context, circuit-breaker status, lifecycle
//! events, configuration and validation errors.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, thiserror.

pub mod circuit;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod message;
pub mod route;
pub mod saga;
