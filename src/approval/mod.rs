//! Approval Gate (spec.md §4.3): the per-step suspension point, resolved
//! from any ingress channel.
//!
//! Exactly one engine task awaits each registered record's future. The
//! table never outlives the workflow it belongs to: `resolve`, `gc`, and
//! `cancel_for_workflow` all remove the entry on the one decision that
//! settles it (idempotent, first-writer-wins).

use crate::events::{EventBus, Topic};
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

use crate::error::{OrchestratorError, OrchestratorResult};

pub type ApprovalKey = (String, String);

/// The decision an approval settles on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Decision {
    Approved { user_input: Option<serde_json::Value> },
    Denied { user_input: Option<serde_json::Value> },
    Cancelled,
    TimedOut,
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved { .. })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved { .. } => "approved",
            Decision::Denied { .. } => "denied",
            Decision::Cancelled => "cancelled",
            Decision::TimedOut => "timeout",
        }
    }
}

struct ApprovalEntry {
    sender: Option<oneshot::Sender<Decision>>,
    requested_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

/// A future the registering task awaits for the decision.
pub struct ApprovalWaiter {
    receiver: oneshot::Receiver<Decision>,
}

impl ApprovalWaiter {
    /// Await the decision, or `Decision::TimedOut` if the receiver is
    /// dropped without ever being resolved (e.g. the gate itself is torn
    /// down). Callers additionally race this against their own step
    /// timeout per spec.md §4.5.
    pub async fn await_decision(self) -> Decision {
        self.receiver.await.unwrap_or(Decision::TimedOut)
    }
}

pub struct ApprovalGate {
    pending: Arc<DashMap<ApprovalKey, ApprovalEntry>>,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
}

impl ApprovalGate {
    pub fn new(events: EventBus, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            events,
            metrics,
        }
    }

    /// Insert a pending record and return a future resolving to the
    /// decision. Also spawns a per-entry deadline timer so the record
    /// resolves as `TimedOut` on its own even without an explicit `gc()`
    /// sweep.
    pub async fn register(
        &self,
        workflow_id: &str,
        step_id: &str,
        deadline_duration: Duration,
    ) -> OrchestratorResult<ApprovalWaiter> {
        let key = (workflow_id.to_string(), step_id.to_string());
        let (tx, rx) = oneshot::channel();
        let requested_at = Utc::now();
        let deadline = requested_at + chrono::Duration::from_std(deadline_duration).unwrap_or(chrono::Duration::zero());

        match self.pending.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OrchestratorError::AlreadyPending);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ApprovalEntry {
                    sender: Some(tx),
                    requested_at,
                    deadline,
                });
            }
        }

        self.events
            .publish(
                Topic::WorkflowApprovalRequired,
                serde_json::json!({
                    "workflow_id": workflow_id,
                    "step_id": step_id,
                    "requested_at": requested_at,
                    "deadline": deadline,
                }),
            )
            .await;
        self.metrics.record_approval_requested();

        self.spawn_deadline_timer(key, deadline_duration);

        Ok(ApprovalWaiter { receiver: rx })
    }

    fn spawn_deadline_timer(&self, key: ApprovalKey, deadline_duration: Duration) {
        let pending = self.pending.clone();
        let events = self.events.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline_duration).await;
            Self::resolve_entry(&pending, &events, &metrics, &key, Decision::TimedOut).await;
        });
    }

    /// Resolve a pending approval. Idempotent: the first call wins, any
    /// later call for the same key returns `AlreadyResolved`.
    pub async fn resolve(
        &self,
        workflow_id: &str,
        step_id: &str,
        decision: Decision,
    ) -> OrchestratorResult<()> {
        let key = (workflow_id.to_string(), step_id.to_string());
        Self::resolve_entry(&self.pending, &self.events, &self.metrics, &key, decision).await
    }

    async fn resolve_entry(
        pending: &DashMap<ApprovalKey, ApprovalEntry>,
        events: &EventBus,
        metrics: &MetricsCollector,
        key: &ApprovalKey,
        decision: Decision,
    ) -> OrchestratorResult<()> {
        let sender = {
            let mut entry = match pending.get_mut(key) {
                Some(entry) => entry,
                None => return Err(OrchestratorError::NotFound(format!("{}:{}", key.0, key.1))),
            };
            match entry.sender.take() {
                Some(sender) => sender,
                None => return Err(OrchestratorError::AlreadyResolved),
            }
        };
        pending.remove(key);

        let decision_str = decision.as_str();
        let _ = sender.send(decision.clone());

        events
            .publish(
                Topic::WorkflowApprovalResolved,
                serde_json::json!({
                    "workflow_id": key.0,
                    "step_id": key.1,
                    "decision": decision_str,
                }),
            )
            .await;
        metrics.record_approval_resolved(decision_str);
        info!(workflow_id = %key.0, step_id = %key.1, decision = decision_str, "approval resolved");
        Ok(())
    }

    /// Resolve every pending approval for a workflow as `Cancelled`.
    pub async fn cancel_for_workflow(&self, workflow_id: &str) {
        let keys: Vec<ApprovalKey> = self
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|(wf, _)| wf == workflow_id)
            .collect();
        for key in keys {
            let _ = Self::resolve_entry(&self.pending, &self.events, &self.metrics, &key, Decision::Cancelled).await;
        }
    }

    /// Explicit sweep resolving any record whose deadline has passed as
    /// `TimedOut`. The per-entry timer spawned in `register` makes this
    /// redundant in normal operation; it exists so a host can run its own
    /// periodic sweeper instead of relying on per-entry tasks, and so tests
    /// can force a deterministic sweep.
    pub async fn gc(&self) {
        let now = Utc::now();
        let expired: Vec<ApprovalKey> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            let _ = Self::resolve_entry(&self.pending, &self.events, &self.metrics, &key, Decision::TimedOut).await;
        }
    }

    /// Steps currently `waiting_approval` for one workflow (spec.md §6
    /// `GET .../pending_approvals`, recovered from the original's
    /// `get_pending_approvals` endpoint).
    pub fn pending_for_workflow(&self, workflow_id: &str) -> Vec<String> {
        self.pending
            .iter()
            .filter(|entry| entry.key().0 == workflow_id)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    pub fn is_pending(&self, workflow_id: &str, step_id: &str) -> bool {
        self.pending.contains_key(&(workflow_id.to_string(), step_id.to_string()))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ApprovalGate {
        let events = EventBus::new(16, Duration::from_millis(50));
        ApprovalGate::new(events, Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn register_then_resolve_delivers_decision() {
        let gate = gate();
        let waiter = tokio_test::assert_ok!(gate.register("wf-1", "step_1", Duration::from_secs(10)).await);
        tokio_test::assert_ok!(gate.resolve("wf-1", "step_1", Decision::Approved { user_input: None }).await);
        assert_eq!(waiter.await_decision().await, Decision::Approved { user_input: None });
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn double_register_is_rejected() {
        let gate = gate();
        let _waiter = gate.register("wf-1", "step_1", Duration::from_secs(10)).await.unwrap();
        let second = gate.register("wf-1", "step_1", Duration::from_secs(10)).await;
        tokio_test::assert_err!(second);
    }

    #[tokio::test]
    async fn second_resolve_returns_already_resolved() {
        let gate = gate();
        let _waiter = gate.register("wf-1", "step_1", Duration::from_secs(10)).await.unwrap();
        gate.resolve("wf-1", "step_1", Decision::Denied { user_input: None }).await.unwrap();
        let second = gate.resolve("wf-1", "step_1", Decision::Approved { user_input: None }).await;
        assert!(matches!(second, Err(OrchestratorError::AlreadyResolved)));
    }

    #[tokio::test]
    async fn gc_times_out_expired_entries() {
        let gate = gate();
        let waiter = gate.register("wf-1", "step_1", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        gate.gc().await;
        assert_eq!(waiter.await_decision().await, Decision::TimedOut);
    }

    #[tokio::test]
    async fn cancel_for_workflow_resolves_all_its_approvals() {
        let gate = gate();
        let waiter_a = gate.register("wf-1", "step_1", Duration::from_secs(10)).await.unwrap();
        let waiter_b = gate.register("wf-1", "step_2", Duration::from_secs(10)).await.unwrap();
        let _other = gate.register("wf-2", "step_1", Duration::from_secs(10)).await.unwrap();

        gate.cancel_for_workflow("wf-1").await;

        assert_eq!(waiter_a.await_decision().await, Decision::Cancelled);
        assert_eq!(waiter_b.await_decision().await, Decision::Cancelled);
        assert_eq!(gate.pending_count(), 1);
    }
}
