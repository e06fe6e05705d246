//! Channel Adapter Registry (spec.md §4.2).
//!
//! One [`ChannelAdapter`] per client connection, each fed by a bounded
//! [`AdapterQueue`] owned by the registry. The bus's `publish` only has to
//! push into that queue; translating an [`Event`](crate::events::Event) into
//! the wire format and sending it over the connection is the adapter
//! implementation's job, run on the adapter's own pump task so one slow
//! client never blocks another or the publisher.

mod queue;

pub use queue::{AdapterQueue, QueueError};

use crate::events::{Event, Topic, TopicPattern};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdapterId(pub Uuid);

impl AdapterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AdapterId {
    fn default() -> Self {
        Self::new()
    }
}

/// Message class taxonomy known to both engine and adapter (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Progress,
    Metrics,
    ApprovalRequired,
    TerminalWorkflowState,
    WorkerOffline,
    Informational,
}

impl MessageClass {
    pub fn of(topic: &Topic) -> Self {
        match topic {
            Topic::WorkflowStepStarted | Topic::WorkflowStepCompleted | Topic::WorkflowStepFailed => {
                MessageClass::Progress
            }
            Topic::NpuWorkerMetricsUpdated => MessageClass::Metrics,
            Topic::WorkflowApprovalRequired => MessageClass::ApprovalRequired,
            Topic::WorkflowCompleted
            | Topic::WorkflowFailed
            | Topic::WorkflowCancelled
            | Topic::WorkflowTimeout => MessageClass::TerminalWorkflowState,
            Topic::NpuWorkerStatusChanged => MessageClass::WorkerOffline,
            Topic::WorkflowCreated
            | Topic::WorkflowApprovalResolved
            | Topic::NpuWorkerAdded
            | Topic::NpuWorkerRemoved
            | Topic::NpuWorkerUpdated => MessageClass::Informational,
        }
    }

    /// Critical classes cause the producer to block (up to a grace period)
    /// rather than shed the message when the adapter queue is full.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            MessageClass::ApprovalRequired | MessageClass::TerminalWorkflowState | MessageClass::WorkerOffline
        )
    }

    /// Message types the host may skip re-persisting because they are
    /// already durably recorded elsewhere (e.g. on the Step/Workflow itself).
    /// Mirrors the original implementation's `SKIP_WEBSOCKET_PERSISTENCE_TYPES`.
    pub fn persisted_elsewhere(&self) -> bool {
        matches!(self, MessageClass::Progress | MessageClass::Metrics)
    }
}

/// One connection's egress. Implementations own the actual wire transport
/// (WebSocket, SSE, gRPC stream, ...); that transport is out of scope here.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn id(&self) -> AdapterId;

    /// Per-client filter: topic subscriptions, role/auth. Events that don't
    /// pass are never enqueued for this adapter.
    fn accepts(&self, topic: &Topic) -> bool;

    /// Serialize and send one event over the wire. Errors here count toward
    /// this adapter's failure threshold; they never propagate to the
    /// publisher.
    async fn send_wire(&self, event: &Event) -> Result<(), anyhow::Error>;
}

/// Consecutive delivery failures before an adapter is evicted (spec.md
/// §4.1 — "a repeatedly failing adapter is marked unhealthy and evicted
/// after a threshold").
const FAILURE_EVICTION_THRESHOLD: u32 = 5;

/// A registered adapter plus its queue, subscriptions, and health counters.
pub struct AdapterHandle {
    adapter: Arc<dyn ChannelAdapter>,
    patterns: Vec<TopicPattern>,
    queue: Arc<AdapterQueue>,
    consecutive_failures: AtomicU32,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
}

impl AdapterHandle {
    pub fn new(
        adapter: Arc<dyn ChannelAdapter>,
        patterns: Vec<TopicPattern>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            adapter,
            patterns,
            queue: Arc::new(AdapterQueue::new(queue_capacity)),
            consecutive_failures: AtomicU32::new(0),
            delivered: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> AdapterId {
        self.adapter.id()
    }

    pub fn queue(&self) -> Arc<AdapterQueue> {
        self.queue.clone()
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        self.adapter.accepts(topic) && self.patterns.iter().any(|pattern| pattern.matches(topic))
    }

    /// Enqueue one event, applying the backpressure policy for its class.
    /// Returns `Err` when the adapter should be evicted (a critical message
    /// could not be enqueued within the grace period).
    pub async fn offer(&self, event: Event, critical_block_grace: Duration) -> Result<(), QueueError> {
        let class = MessageClass::of(&event.topic);
        if class.is_critical() {
            self.queue.push_blocking(event, critical_block_grace).await
        } else {
            self.queue.push_drop_oldest(event);
            Ok(())
        }
    }

    pub fn record_delivery_result(&self, result: &Result<(), anyhow::Error>) -> bool {
        match result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.dropped.fetch_add(1, Ordering::Relaxed);
                failures < FAILURE_EVICTION_THRESHOLD
            }
        }
    }

    pub async fn deliver(&self, event: &Event) -> Result<(), anyhow::Error> {
        self.adapter.send_wire(event).await
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            id: self.id(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterStats {
    pub id: AdapterId,
    pub delivered: usize,
    pub dropped: usize,
    pub consecutive_failures: u32,
}
