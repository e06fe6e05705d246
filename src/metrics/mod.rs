//! Metrics (SPEC_FULL.md §10): thin wrapper around the `metrics` facade,
//! exported in Prometheus text-exposition format.
//!
//! Grounded on the original's `workflow_metrics.py`, whose
//! `prometheus_metrics.update_active_workflows` call keys workflow gauges by
//! classification; the teacher's own `observability/metrics.rs` left every
//! method as a stub awaiting a real recorder, which this module provides.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct MetricsCollector {
    handle: Option<PrometheusHandle>,
    active_workflows: Arc<dashmap::DashMap<String, AtomicI64>>,
}

impl MetricsCollector {
    /// Build a collector and install it as the global `metrics` recorder.
    /// Installation failures (a recorder already installed, e.g. in tests
    /// running multiple collectors in-process) are swallowed: metrics calls
    /// degrade to no-ops rather than panicking the host.
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new().install_recorder().ok();
        Self::describe();
        Self {
            handle,
            active_workflows: Arc::new(dashmap::DashMap::new()),
        }
    }

    fn describe() {
        describe_counter!("workflows_created_total", "Workflows admitted for execution");
        describe_counter!("workflows_completed_total", "Workflows that reached a terminal state");
        describe_counter!("approvals_requested_total", "Approval gate registrations");
        describe_counter!("approvals_resolved_total", "Approval gate resolutions by decision");
        describe_gauge!("active_workflows", "Workflows currently executing, by classification");
        describe_gauge!("paired_workers", "Workers currently paired with the pool");
        describe_histogram!("step_duration_seconds", "Wall-clock duration of one step execution");
        describe_histogram!("workflow_duration_seconds", "Wall-clock duration of one workflow, end to end");
    }

    /// Render the current state in Prometheus text-exposition format, the
    /// "standard monitoring line-based format" SPEC_FULL.md §10 calls for.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(PrometheusHandle::render).unwrap_or_default()
    }

    pub fn record_workflow_created(&self, classification: &str) {
        counter!("workflows_created_total", "classification" => classification.to_string()).increment(1);
    }

    pub fn record_workflow_completed(&self, classification: &str, terminal_status: &str) {
        counter!(
            "workflows_completed_total",
            "classification" => classification.to_string(),
            "status" => terminal_status.to_string()
        )
        .increment(1);
    }

    pub fn record_approval_requested(&self) {
        counter!("approvals_requested_total").increment(1);
    }

    pub fn record_approval_resolved(&self, decision: &str) {
        counter!("approvals_resolved_total", "decision" => decision.to_string()).increment(1);
    }

    pub fn set_worker_count(&self, count: usize) {
        gauge!("paired_workers").set(count as f64);
    }

    /// Increment the active-workflow gauge for one classification (spec.md
    /// §11 supplement: per-classification gauges, not just a crate-wide
    /// total).
    pub fn workflow_started(&self, classification: &str) {
        let counter = self
            .active_workflows
            .entry(classification.to_string())
            .or_insert_with(|| AtomicI64::new(0));
        let value = counter.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("active_workflows", "classification" => classification.to_string()).set(value as f64);
    }

    pub fn workflow_finished(&self, classification: &str) {
        if let Some(counter) = self.active_workflows.get(classification) {
            let value = counter.fetch_sub(1, Ordering::Relaxed) - 1;
            gauge!("active_workflows", "classification" => classification.to_string()).set(value.max(0) as f64);
        }
    }

    pub fn active_workflows_total(&self) -> i64 {
        self.active_workflows.iter().map(|entry| entry.value().load(Ordering::Relaxed)).sum()
    }

    pub fn active_workflows_by_classification(&self, classification: &str) -> i64 {
        self.active_workflows
            .get(classification)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn record_step_duration(&self, agent_type: &str, started_at: Instant) {
        histogram!("step_duration_seconds", "agent_type" => agent_type.to_string())
            .record(started_at.elapsed().as_secs_f64());
    }

    pub fn record_workflow_duration(&self, classification: &str, started_at: Instant) {
        histogram!("workflow_duration_seconds", "classification" => classification.to_string())
            .record(started_at.elapsed().as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
