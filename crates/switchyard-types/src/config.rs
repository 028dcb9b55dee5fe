//! Global configuration types for Switchyard.
//!
//! `SwitchyardConfig` represents the top-level `switchyard.toml`. Every field
//! has a default so partial files are valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit::CircuitBreakerConfig;
use crate::saga::CompensationScope;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchyardConfig {
    #[serde(default)]
    pub bus: BusConfig,

    /// Defaults for breakers registered without explicit tuning.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub saga: SagaConfig,
}

/// Message bus tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of the live queue. Sends beyond it are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the dead-letter store. The oldest entry is evicted when full.
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Base of the exponential backoff: delay = base * 2^retry_count.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Retry budget stamped on messages built with `MessageBus::message`.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_dead_letter_capacity() -> usize {
    10_000
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_event_capacity() -> usize {
    1_024
}

fn default_max_retries() -> u32 {
    3
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            dead_letter_capacity: default_dead_letter_capacity(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            event_capacity: default_event_capacity(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl BusConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Saga orchestrator tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaConfig {
    #[serde(default)]
    pub compensation_scope: CompensationScope,
}
