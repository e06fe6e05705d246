use super::{Event, Topic, TopicPattern};
use crate::adapters::{AdapterHandle, AdapterId, AdapterStats, ChannelAdapter};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// In-process topic pub/sub fanning out to registered [`ChannelAdapter`]s.
///
/// Cheap to clone: all state lives behind `Arc`s, so every workflow task,
/// the heartbeat monitor, and the approval-gate sweeper can hold their own
/// handle without contending on a shared lock across awaits.
#[derive(Clone)]
pub struct EventBus {
    adapters: Arc<DashMap<AdapterId, Arc<AdapterHandle>>>,
    queue_capacity: usize,
    critical_block_grace: Duration,
}

impl EventBus {
    pub fn new(queue_capacity: usize, critical_block_grace: Duration) -> Self {
        Self {
            adapters: Arc::new(DashMap::new()),
            queue_capacity,
            critical_block_grace,
        }
    }

    /// Register an adapter that receives every event matching `patterns`.
    /// Spawns the adapter's own pump task; the publisher never waits on
    /// this adapter's wire send.
    pub fn register_egress(&self, adapter: Arc<dyn ChannelAdapter>, patterns: Vec<TopicPattern>) -> AdapterId {
        let handle = Arc::new(AdapterHandle::new(adapter, patterns, self.queue_capacity));
        let id = handle.id();
        self.adapters.insert(id, handle.clone());
        self.spawn_pump(handle);
        id
    }

    /// Subscribe shorthand for a single topic/pattern string, e.g.
    /// `"workflow.step.*"` or an exact topic name.
    pub fn subscribe(&self, pattern: &str, adapter: Arc<dyn ChannelAdapter>) -> AdapterId {
        self.register_egress(adapter, vec![TopicPattern::parse(pattern)])
    }

    pub fn unsubscribe(&self, id: AdapterId) {
        self.adapters.remove(&id);
    }

    /// Publish an event to every matching, currently-registered adapter.
    /// Returns once the event has been enqueued (not delivered) everywhere;
    /// per-adapter delivery failures never propagate here.
    pub async fn publish(&self, topic: Topic, payload: serde_json::Value) {
        let event = Event::new(topic, payload);
        let matching: Vec<Arc<AdapterHandle>> = self
            .adapters
            .iter()
            .filter(|entry| entry.value().matches(&topic))
            .map(|entry| entry.value().clone())
            .collect();

        let offers = matching.into_iter().map(|handle| {
            let event = event.clone();
            let grace = self.critical_block_grace;
            let adapters = self.adapters.clone();
            async move {
                if handle.offer(event, grace).await.is_err() {
                    warn!(adapter_id = ?handle.id(), topic = %topic, "critical message not enqueued within grace period, evicting adapter");
                    adapters.remove(&handle.id());
                }
            }
        });
        futures::future::join_all(offers).await;
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn adapter_stats(&self) -> Vec<AdapterStats> {
        self.adapters.iter().map(|entry| entry.value().stats()).collect()
    }

    fn spawn_pump(&self, handle: Arc<AdapterHandle>) {
        let adapters = self.adapters.clone();
        tokio::spawn(async move {
            loop {
                let event = handle.queue().pop().await;
                let result = handle.deliver(&event).await;
                let keep = handle.record_delivery_result(&result);
                if let Err(err) = &result {
                    debug!(adapter_id = ?handle.id(), error = %err, "adapter delivery failed");
                }
                if !keep {
                    warn!(adapter_id = ?handle.id(), "adapter evicted after repeated delivery failures");
                    adapters.remove(&handle.id());
                    break;
                }
                if !adapters.contains_key(&handle.id()) {
                    break;
                }
            }
        });
    }
}
