//! NPU Worker Pool (spec.md §4.4): pairing lifecycle, heartbeat-driven
//! health, and load-balanced dispatch.

pub mod balancer;

pub use balancer::LoadBalancingStrategy;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventBus, Topic};
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Health states a paired worker can be in (spec.md §4.4). Transitions are
/// driven by elapsed time since the last heartbeat: `Online` -> `Degraded`
/// after one missed interval, `Degraded` -> `Offline` after three; any
/// heartbeat received while `Degraded` or `Offline` moves the worker back to
/// `Online` immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerStatus {
    Pairing = 0,
    Online = 1,
    Degraded = 2,
    Offline = 3,
    Unpaired = 4,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Pairing,
            1 => WorkerStatus::Online,
            2 => WorkerStatus::Degraded,
            3 => WorkerStatus::Offline,
            _ => WorkerStatus::Unpaired,
        }
    }
}

/// Pairing request for a worker (spec.md §3 Worker fields, §6 `worker.pair`
/// inputs). `id` is deliberately absent: the core assigns it on pairing, it
/// is never self-claimed by the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address the core would dial to reach this worker. Also the key
    /// pairing idempotency is keyed on (spec.md §8: pairing the same worker
    /// twice by `url` is a no-op, not a new registration).
    pub url: String,
    pub platform: String,
    pub priority: u8,
    pub weight: u32,
    pub max_concurrent_tasks: usize,
    pub capabilities: Vec<String>,
}

struct WorkerInner {
    id: String,
    config: WorkerConfig,
    status: AtomicU8,
    active_steps: AtomicUsize,
    consecutive_misses: AtomicU32,
    consecutive_rpc_failures: AtomicU32,
    last_heartbeat: Mutex<DateTime<Utc>>,
}

/// A cheap-to-clone handle to one paired worker's live state.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

impl WorkerHandle {
    /// Build a standalone handle for tests/benches. [`WorkerPool::pair`] is
    /// the only path that assigns a worker's id in normal operation.
    pub fn new(id: String, config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                id,
                config,
                status: AtomicU8::new(WorkerStatus::Pairing as u8),
                active_steps: AtomicUsize::new(0),
                consecutive_misses: AtomicU32::new(0),
                consecutive_rpc_failures: AtomicU32::new(0),
                last_heartbeat: Mutex::new(Utc::now()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn platform(&self) -> &str {
        &self.inner.config.platform
    }

    pub fn priority(&self) -> u8 {
        self.inner.config.priority
    }

    pub fn weight(&self) -> u32 {
        self.inner.config.weight
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.config.max_concurrent_tasks
    }

    pub fn capabilities(&self) -> &[String] {
        &self.inner.config.capabilities
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.inner.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: WorkerStatus) {
        self.inner.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn active_steps(&self) -> usize {
        self.inner.active_steps.load(Ordering::Relaxed)
    }

    /// `current_load / max_concurrent_tasks`, the ratio `LeastLoaded`
    /// compares and the quantity spec.md §8's capacity invariant bounds to
    /// `[0, 1]` (a worker at `max_concurrent_tasks == 0` is never eligible,
    /// so the ratio is defined only where it matters for dispatch).
    pub fn load_ratio(&self) -> f64 {
        let max = self.max_concurrent_tasks();
        if max == 0 {
            return f64::INFINITY;
        }
        self.active_steps() as f64 / max as f64
    }

    pub fn has_capacity(&self) -> bool {
        self.max_concurrent_tasks() > 0 && self.active_steps() < self.max_concurrent_tasks()
    }

    pub fn begin_step(&self) {
        self.inner.active_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_step(&self) {
        self.inner.active_steps.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1))).ok();
    }

    pub fn record_heartbeat(&self) {
        *self.inner.last_heartbeat.lock().unwrap_or_else(|p| p.into_inner()) = Utc::now();
        self.inner.consecutive_misses.store(0, Ordering::Relaxed);
    }

    fn elapsed_since_heartbeat(&self) -> chrono::Duration {
        let last = *self.inner.last_heartbeat.lock().unwrap_or_else(|p| p.into_inner());
        Utc::now() - last
    }

    /// Record a remote dispatch's outcome (spec.md §4.4: "an RPC failure
    /// marks the worker degraded; two consecutive failures move it to
    /// offline"). Distinct from the heartbeat-miss counter: an RPC can fail
    /// on a worker that is heartbeating normally.
    pub fn record_rpc_outcome(&self, ok: bool) {
        if ok {
            self.inner.consecutive_rpc_failures.store(0, Ordering::Relaxed);
            return;
        }
        let failures = self.inner.consecutive_rpc_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= 2 {
            self.set_status(WorkerStatus::Offline);
        } else {
            self.set_status(WorkerStatus::Degraded);
        }
    }
}

pub struct WorkerPool {
    workers: Arc<DashMap<String, WorkerHandle>>,
    strategy: LoadBalancingStrategy,
    round_robin_cursor: AtomicUsize,
    heartbeat_interval: Duration,
    offline_after: Duration,
    retry_budget: u32,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
}

impl WorkerPool {
    pub fn new(
        strategy: LoadBalancingStrategy,
        heartbeat_interval: Duration,
        offline_after: Duration,
        retry_budget: u32,
        events: EventBus,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
            strategy,
            // Random start so multiple pools in the same process (tests,
            // multi-tenant hosts) don't all dispatch their first round-robin
            // pick to the same worker index.
            round_robin_cursor: AtomicUsize::new(rand::random::<usize>()),
            heartbeat_interval,
            offline_after,
            retry_budget,
            events,
            metrics,
        }
    }

    /// Core-initiated pairing: assigns a new worker id and marks it
    /// `Online`, or returns the existing id unchanged if this `url` is
    /// already paired (spec.md §8: idempotent pair by url).
    pub async fn pair(&self, config: WorkerConfig) -> OrchestratorResult<String> {
        if let Some(existing) = self.workers.iter().find(|e| e.value().url() == config.url) {
            return Ok(existing.key().clone());
        }
        let id = Uuid::new_v4().to_string();
        let handle = WorkerHandle::new(id.clone(), config);
        handle.set_status(WorkerStatus::Online);
        self.workers.insert(id.clone(), handle);
        self.metrics.set_worker_count(self.workers.len());
        self.events
            .publish(Topic::NpuWorkerAdded, serde_json::json!({ "worker_id": id }))
            .await;
        info!(worker_id = %id, "worker paired");
        Ok(id)
    }

    pub async fn unpair(&self, worker_id: &str) -> OrchestratorResult<()> {
        match self.workers.remove(worker_id) {
            Some(_) => {
                self.metrics.set_worker_count(self.workers.len());
                self.events
                    .publish(Topic::NpuWorkerRemoved, serde_json::json!({ "worker_id": worker_id }))
                    .await;
                Ok(())
            }
            None => Err(OrchestratorError::NotFound(worker_id.to_string())),
        }
    }

    /// Re-pair a previously offline/unpaired worker without losing its
    /// configured priority/weight/capabilities.
    pub async fn repair(&self, worker_id: &str) -> OrchestratorResult<()> {
        let handle = self
            .workers
            .get(worker_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(worker_id.to_string()))?;
        handle.record_heartbeat();
        let previous = handle.status();
        handle.set_status(WorkerStatus::Online);
        if previous != WorkerStatus::Online {
            self.events
                .publish(
                    Topic::NpuWorkerStatusChanged,
                    serde_json::json!({ "worker_id": worker_id, "status": "online" }),
                )
                .await;
        }
        Ok(())
    }

    pub async fn heartbeat(&self, worker_id: &str, metrics: serde_json::Value) -> OrchestratorResult<()> {
        let handle = self
            .workers
            .get(worker_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(worker_id.to_string()))?;
        let was_healthy = handle.status() == WorkerStatus::Online;
        handle.record_heartbeat();
        if !was_healthy {
            handle.set_status(WorkerStatus::Online);
            self.events
                .publish(
                    Topic::NpuWorkerStatusChanged,
                    serde_json::json!({ "worker_id": worker_id, "status": "online" }),
                )
                .await;
        }
        self.events
            .publish(
                Topic::NpuWorkerMetricsUpdated,
                serde_json::json!({ "worker_id": worker_id, "metrics": metrics }),
            )
            .await;
        Ok(())
    }

    /// One sweep of the heartbeat health FSM. The host is expected to call
    /// this on a fixed tick (see `spawn_heartbeat_monitor`).
    pub async fn sweep_heartbeats(&self) {
        let stale: Vec<(String, WorkerHandle, WorkerStatus)> = self
            .workers
            .iter()
            .filter_map(|entry| {
                let handle = entry.value().clone();
                let elapsed = handle.elapsed_since_heartbeat();
                let next = if elapsed > chrono::Duration::from_std(self.offline_after).unwrap_or_default() {
                    Some(WorkerStatus::Offline)
                } else if elapsed > chrono::Duration::from_std(self.heartbeat_interval).unwrap_or_default() {
                    Some(WorkerStatus::Degraded)
                } else {
                    None
                };
                next.filter(|status| *status != handle.status())
                    .map(|status| (entry.key().clone(), handle, status))
            })
            .collect();

        for (worker_id, handle, status) in stale {
            handle.set_status(status);
            warn!(worker_id = %worker_id, status = ?status, "worker health transition");
            self.events
                .publish(
                    Topic::NpuWorkerStatusChanged,
                    serde_json::json!({ "worker_id": worker_id, "status": format!("{:?}", status).to_lowercase() }),
                )
                .await;
        }
    }

    /// Background task that sweeps heartbeats on every `heartbeat_interval`
    /// tick until the returned handle is dropped.
    pub fn spawn_heartbeat_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.sweep_heartbeats().await;
            }
        })
    }

    /// Select and reserve the next worker for dispatch, retrying up to the
    /// configured budget before surfacing `NoCapacity`.
    pub fn acquire(&self) -> OrchestratorResult<WorkerHandle> {
        for attempt in 0..=self.retry_budget {
            let candidates: Vec<WorkerHandle> = self.workers.iter().map(|e| e.value().clone()).collect();
            let eligible = LoadBalancingStrategy::eligible(&candidates);
            let cursor = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
            if let Some(chosen) = self.strategy.select(&eligible, cursor) {
                chosen.begin_step();
                return Ok(chosen.clone());
            }
            if attempt == self.retry_budget {
                break;
            }
        }
        Err(OrchestratorError::NoCapacity {
            attempts: self.retry_budget + 1,
        })
    }

    pub fn release(&self, worker: &WorkerHandle) {
        worker.end_step();
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerHandle> {
        self.workers.get(worker_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<WorkerHandle> {
        self.workers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }
}
