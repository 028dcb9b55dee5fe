//! Terminal storage for expired and retry-exhausted messages.
//!
//! Entries are kept for inspection only; nothing is replayed automatically.
//! The store is bounded: when full, the oldest entry is evicted.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use switchyard_types::message::{
    DEAD_LETTER_REASON_HEADER, DEAD_LETTER_TIMESTAMP_HEADER, Message,
};
use tracing::warn;

/// Reason recorded for messages whose TTL elapsed before enqueue.
pub const TTL_EXPIRED_REASON: &str = "TTL expired";

/// One dead-lettered message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEntry {
    pub message: Message,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DeadLetterStore {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: usize,
}

impl DeadLetterStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Stamp the dead-letter headers on `message` and store it.
    pub fn push(&self, message: Message, reason: impl Into<String>) -> DeadLetterEntry {
        self.push_at(message, reason, Utc::now())
    }

    pub(crate) fn push_at(
        &self,
        mut message: Message,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> DeadLetterEntry {
        let reason = reason.into();
        message.dead_letter = true;
        message
            .headers
            .insert(DEAD_LETTER_REASON_HEADER.to_string(), json!(reason));
        message.headers.insert(
            DEAD_LETTER_TIMESTAMP_HEADER.to_string(),
            json!(at.to_rfc3339()),
        );

        let entry = DeadLetterEntry {
            message,
            reason,
            dead_lettered_at: at,
        };

        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                warn!(
                    message_id = %evicted.message.id,
                    capacity = self.capacity,
                    "dead-letter store full, evicting oldest entry"
                );
            }
        }
        entries.push_back(entry.clone());
        entry
    }

    /// Remove entries dead-lettered more than `older_than_hours` ago.
    ///
    /// Returns the number of removed entries.
    pub fn clear_older_than(&self, older_than_hours: u64) -> usize {
        let cutoff = Utc::now() - Duration::hours(older_than_hours as i64);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.dead_lettered_at >= cutoff);
        before - entries.len()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetterEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
