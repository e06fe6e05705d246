//! In-process topic pub/sub (spec.md §4.1).
//!
//! `publish` returns once an event has been enqueued for every currently
//! subscribed adapter — it never waits on a network send. Ordering is
//! per-producer-per-adapter: events published by one caller are delivered to
//! one adapter in publish order, but there is no cross-producer or
//! cross-adapter global order.

mod bus;
mod topic;

pub use bus::EventBus;
pub use topic::{Topic, TopicPattern};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A published, immutable event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub payload: serde_json::Value,
    /// Monotonically increasing per process; lets adapters detect gaps.
    pub sequence: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Process-wide event sequence counter.
///
/// A single counter (rather than one per topic or per adapter) is enough to
/// satisfy "strictly increasing sequence per adapter" (spec.md §8 invariant
/// 4) since a strictly increasing global counter is trivially strictly
/// increasing on any subsequence an adapter observes.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

impl Event {
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self {
            topic,
            payload,
            sequence: next_sequence(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// spec.md §8 invariant 4: an adapter's observed sequence numbers are
        /// strictly increasing.
        #[test]
        fn event_sequence_is_strictly_increasing(count in 1usize..100) {
            let mut last: Option<u64> = None;
            for _ in 0..count {
                let event = Event::new(Topic::WorkflowCreated, serde_json::json!({}));
                if let Some(previous) = last {
                    prop_assert!(event.sequence > previous);
                }
                last = Some(event.sequence);
            }
        }
    }
}
