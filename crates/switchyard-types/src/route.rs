//! Route and processor domain types.
//!
//! A `Route` maps a source pattern to an ordered processor pipeline and a set
//! of destination URIs. Its `RouteMetrics` are recomputed after every
//! processing attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source pattern that matches every message.
pub const WILDCARD_SOURCE: &str = "*";

/// A routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub name: String,
    /// Source pattern: an exact source URI, `*`, or a destination URI.
    pub from: String,
    /// Destination URIs, delivered in order.
    #[serde(default)]
    pub to: Vec<String>,
    /// Processor IDs, run in order.
    #[serde(default)]
    pub processors: Vec<String>,
    /// Route ID invoked with a wrapped-error message when this route fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub metrics: RouteMetrics,
}

fn default_enabled() -> bool {
    true
}

impl Route {
    /// Build an enabled route with zeroed metrics.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        from: impl Into<String>,
        to: Vec<String>,
        processors: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            from: from.into(),
            to,
            processors,
            error_handler: None,
            enabled: true,
            metrics: RouteMetrics::default(),
        }
    }

    /// Whether this route accepts a message with the given source/destination.
    ///
    /// Disabled routes never match.
    pub fn matches(&self, source: &str, destination: Option<&str>) -> bool {
        self.enabled
            && (self.from == source
                || self.from == WILDCARD_SOURCE
                || destination.is_some_and(|d| d == self.from))
    }
}

/// Per-route processing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteMetrics {
    pub messages_processed: u64,
    pub messages_failed: u64,
    /// Running two-sample average: `(previous + latest) / 2`. Not a true mean.
    pub average_processing_time_ms: f64,
    /// Messages per second, derived from the gap since the previous attempt.
    pub throughput: f64,
    pub last_processed: Option<DateTime<Utc>>,
    /// `messages_failed / (messages_processed + messages_failed)`.
    pub error_rate: f64,
}

impl RouteMetrics {
    /// Fold one processing attempt into the metrics.
    pub fn record(&mut self, success: bool, elapsed_ms: f64, now: DateTime<Utc>) {
        if success {
            self.messages_processed += 1;
        } else {
            self.messages_failed += 1;
        }

        self.average_processing_time_ms = (self.average_processing_time_ms + elapsed_ms) / 2.0;

        if let Some(previous) = self.last_processed {
            let gap_ms = (now - previous).num_milliseconds();
            if gap_ms > 0 {
                self.throughput = 1000.0 / gap_ms as f64;
            }
        }
        self.last_processed = Some(now);

        let total = self.messages_processed + self.messages_failed;
        self.error_rate = if total == 0 {
            0.0
        } else {
            self.messages_failed as f64 / total as f64
        };
    }
}

/// Processor category. Informational only: every processor exposes the same
/// single `process` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Transformer,
    Filter,
    Enricher,
    Splitter,
    Aggregator,
    Validator,
    Custom,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn route(from: &str) -> Route {
        Route::new("r1", "Route 1", from, vec!["sink://a".into()], vec![])
    }

    #[test]
    fn test_matches_exact_source() {
        let r = route("src://x");
        assert!(r.matches("src://x", None));
        assert!(!r.matches("src://y", None));
    }

    #[test]
    fn test_matches_wildcard() {
        assert!(route("*").matches("anything", None));
    }

    #[test]
    fn test_matches_destination() {
        let r = route("queue://billing");
        assert!(r.matches("src://x", Some("queue://billing")));
        assert!(!r.matches("src://x", Some("queue://other")));
    }

    #[test]
    fn test_disabled_route_never_matches() {
        let mut r = route("*");
        r.enabled = false;
        assert!(!r.matches("src://x", None));
    }

    #[test]
    fn test_metrics_two_sample_average() {
        let mut m = RouteMetrics::default();
        let now = Utc::now();
        m.record(true, 10.0, now);
        assert_eq!(m.average_processing_time_ms, 5.0);
        m.record(true, 20.0, now + Duration::milliseconds(500));
        assert_eq!(m.average_processing_time_ms, 12.5);
        assert_eq!(m.messages_processed, 2);
        assert_eq!(m.throughput, 2.0);
    }

    #[test]
    fn test_metrics_error_rate() {
        let mut m = RouteMetrics::default();
        let now = Utc::now();
        m.record(true, 1.0, now);
        m.record(false, 1.0, now);
        m.record(true, 1.0, now);
        m.record(false, 1.0, now);
        assert_eq!(m.messages_processed, 2);
        assert_eq!(m.messages_failed, 2);
        assert_eq!(m.error_rate, 0.5);
        assert_eq!(m.last_processed, Some(now));
    }

    #[test]
    fn test_first_record_leaves_throughput_zero() {
        let mut m = RouteMetrics::default();
        m.record(true, 3.0, Utc::now());
        assert_eq!(m.throughput, 0.0);
    }
}
