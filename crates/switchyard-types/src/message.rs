//! Message envelope exchanged by every Switchyard component.
//!
//! A `Message` carries an opaque JSON body plus routing metadata (source,
//! optional destination), delivery bookkeeping (retry count and budget,
//! dead-letter flag) and free-form headers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Header stamped on a message when it is moved to the dead-letter store.
pub const DEAD_LETTER_REASON_HEADER: &str = "deadLetterReason";

/// Header holding the RFC 3339 time a message was dead-lettered.
pub const DEAD_LETTER_TIMESTAMP_HEADER: &str = "deadLetterTimestamp";

/// Delivery priority. Informational: the live queue is strictly FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

/// A routed envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (UUIDv7 string when generated by Switchyard).
    pub id: String,
    /// Correlates messages belonging to the same conversation or saga.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Creation time. TTL is measured from here.
    pub timestamp: DateTime<Utc>,
    /// Free-form headers.
    #[serde(default)]
    pub headers: HashMap<String, serde_json::Value>,
    /// Opaque payload.
    pub body: serde_json::Value,
    /// Source URI used for route matching.
    pub source: String,
    /// Optional destination URI, also used for route matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Time-to-live in milliseconds, checked once at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Retry budget. A message is attempted at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Set once the message lands in the dead-letter store.
    #[serde(default)]
    pub dead_letter: bool,
}

impl Message {
    /// Check the required envelope fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.source.trim().is_empty() {
            return Err(ValidationError::MissingField("source"));
        }
        if self.retry_count > self.max_retries {
            return Err(ValidationError::RetryBudgetExceeded {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        Ok(())
    }

    /// Whether the TTL has elapsed at `now`. Messages without a TTL never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => {
                let age_ms = (now - self.timestamp).num_milliseconds();
                age_ms > ttl as i64
            }
            None => false,
        }
    }

    /// Read a header as a string, if present and a JSON string.
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample() -> Message {
        Message {
            id: "m-1".to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            headers: HashMap::new(),
            body: json!({"order": 42}),
            source: "src://orders".to_string(),
            destination: None,
            priority: Priority::Normal,
            ttl_ms: None,
            retry_count: 0,
            max_retries: 3,
            dead_letter: false,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_message() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_source() {
        let mut msg = sample();
        msg.source = "  ".to_string();
        assert!(matches!(
            msg.validate(),
            Err(ValidationError::MissingField("source"))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let mut msg = sample();
        msg.id.clear();
        assert!(matches!(msg.validate(), Err(ValidationError::MissingField("id"))));
    }

    #[test]
    fn test_validate_rejects_exhausted_retry_budget() {
        let mut msg = sample();
        msg.retry_count = 4;
        assert!(matches!(
            msg.validate(),
            Err(ValidationError::RetryBudgetExceeded { retry_count: 4, max_retries: 3 })
        ));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut msg = sample();
        msg.timestamp = Utc::now() - Duration::seconds(10);
        msg.ttl_ms = Some(1_000);
        assert!(msg.is_expired_at(Utc::now()));

        msg.ttl_ms = Some(60_000);
        assert!(!msg.is_expired_at(Utc::now()));

        msg.ttl_ms = None;
        assert!(!msg.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_priority_parse_and_display() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!(Priority::High.to_string(), "high");
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(ValidationError::InvalidPriority(ref p)) if p == "urgent"
        ));
    }

    #[test]
    fn test_unknown_priority_rejected_by_serde() {
        let raw = json!({
            "id": "m-2",
            "timestamp": Utc::now(),
            "body": null,
            "source": "src://x",
            "priority": "urgent",
            "max_retries": 1
        });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }

    #[test]
    fn test_message_json_defaults() {
        let raw = json!({
            "id": "m-3",
            "timestamp": Utc::now(),
            "body": {"k": "v"},
            "source": "src://x",
            "max_retries": 2
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.priority, Priority::Normal);
        assert_eq!(msg.retry_count, 0);
        assert!(msg.headers.is_empty());
        assert!(!msg.dead_letter);
        assert!(msg.destination.is_none());
    }

    #[test]
    fn test_header_str() {
        let mut msg = sample();
        msg.headers.insert(DEAD_LETTER_REASON_HEADER.to_string(), json!("TTL expired"));
        assert_eq!(msg.header_str(DEAD_LETTER_REASON_HEADER), Some("TTL expired"));
        assert_eq!(msg.header_str("missing"), None);
    }
}
