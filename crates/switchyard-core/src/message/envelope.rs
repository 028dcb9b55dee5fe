//! Helper constructors for `Message` envelopes.
//!
//! Reduces boilerplate when building messages for routing, and builds the
//! synthetic wrapped-error messages sent to error-handler routes.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use switchyard_types::message::{Message, Priority};
use uuid::Uuid;

/// Source URI prefix of wrapped-error messages.
pub const ERROR_SOURCE_PREFIX: &str = "error://";

/// Build a message from `source` with a fresh UUIDv7 ID.
pub fn new(source: impl Into<String>, body: serde_json::Value, max_retries: u32) -> Message {
    Message {
        id: Uuid::now_v7().to_string(),
        correlation_id: None,
        timestamp: Utc::now(),
        headers: HashMap::new(),
        body,
        source: source.into(),
        destination: None,
        priority: Priority::Normal,
        ttl_ms: None,
        retry_count: 0,
        max_retries,
        dead_letter: false,
    }
}

/// Build a message addressed to an explicit destination URI.
pub fn addressed(
    source: impl Into<String>,
    destination: impl Into<String>,
    body: serde_json::Value,
    max_retries: u32,
) -> Message {
    let mut msg = new(source, body, max_retries);
    msg.destination = Some(destination.into());
    msg
}

/// Wrap a failed message and its error for delivery to an error-handler route.
///
/// The wrapper keeps the original correlation ID (falling back to the original
/// message ID) and never retries.
pub fn wrap_error(original: &Message, failed_route_id: &str, error: &str) -> Message {
    let mut wrapper = new(
        format!("{ERROR_SOURCE_PREFIX}{failed_route_id}"),
        json!({
            "error": error,
            "originalMessage": original,
        }),
        0,
    );
    wrapper.correlation_id = original
        .correlation_id
        .clone()
        .or_else(|| Some(original.id.clone()));
    wrapper.priority = original.priority;
    wrapper
        .headers
        .insert("originalMessageId".to_string(), json!(original.id));
    wrapper
        .headers
        .insert("failedRouteId".to_string(), json!(failed_route_id));
    wrapper
}
