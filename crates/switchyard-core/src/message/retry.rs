//! Exponential-backoff retry scheduling.
//!
//! Failed messages are parked in a min-heap keyed by the instant they become
//! eligible again. A dedicated scheduler task sleeps until the earliest entry
//! is due, then appends it to the tail of the live queue. Retries therefore do
//! not keep their original position relative to newer arrivals.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use switchyard_types::message::Message;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay before the next attempt: `base * 2^retry_count`, saturating.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

struct Delayed {
    due: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Producer side of the delayed queue. Cheap to clone.
#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<Delayed>,
    seq: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

/// Consumer side, moved into the scheduler task.
pub struct RetryScheduler {
    rx: mpsc::UnboundedReceiver<Delayed>,
    pending: Arc<AtomicUsize>,
}

/// Create a connected queue/scheduler pair.
pub fn retry_channel() -> (RetryQueue, RetryScheduler) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        RetryQueue {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            pending: pending.clone(),
        },
        RetryScheduler { rx, pending },
    )
}

impl RetryQueue {
    /// Park `message` until `delay` has passed.
    ///
    /// Returns `false` if the scheduler has shut down and the message was lost.
    pub fn schedule(&self, message: Message, delay: Duration) -> bool {
        let delayed = Delayed {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            message,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(delayed).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Messages currently waiting for their backoff to elapse.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl RetryScheduler {
    /// Run until cancelled, re-enqueueing due messages onto `live`.
    ///
    /// Pending retries are dropped on cancellation.
    pub async fn run(mut self, live: mpsc::Sender<Message>, token: CancellationToken) {
        let mut heap: BinaryHeap<Reverse<Delayed>> = BinaryHeap::new();
        let mut inbox_open = true;

        loop {
            let next_due = heap.peek().map(|Reverse(d)| d.due);
            if !inbox_open && next_due.is_none() {
                break;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                incoming = self.rx.recv(), if inbox_open => match incoming {
                    Some(delayed) => heap.push(Reverse(delayed)),
                    None => inbox_open = false,
                },
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    let now = Instant::now();
                    while heap.peek().is_some_and(|Reverse(d)| d.due <= now) {
                        let Some(Reverse(delayed)) = heap.pop() else { break };
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                        debug!(
                            message_id = %delayed.message.id,
                            retry_count = delayed.message.retry_count,
                            "re-enqueueing message after backoff"
                        );
                        tokio::select! {
                            _ = token.cancelled() => return,
                            sent = live.send(delayed.message) => {
                                if sent.is_err() {
                                    warn!("live queue closed, retry scheduler stopping");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }

        if !heap.is_empty() {
            debug!(dropped = heap.len(), "retry scheduler stopped with pending retries");
        }
    }
}
