//! Root composition (spec.md §9 "dependency-passed coordinators"): wires the
//! four subsystems together behind one handle a host constructs once and
//! clones freely.

use crate::approval::ApprovalGate;
use crate::config::Config;
use crate::error::OrchestratorResult;
use crate::events::EventBus;
use crate::executor::ExecutorRegistry;
use crate::metrics::MetricsCollector;
use crate::workers::{WorkerConfig, WorkerPool};
use crate::workflow::{Classifier, KeywordClassifier, Workflow, WorkflowEngine};
use std::sync::Arc;

pub struct Core {
    pub events: EventBus,
    pub approvals: Arc<ApprovalGate>,
    pub workers: Arc<WorkerPool>,
    pub engine: Arc<WorkflowEngine>,
    pub metrics: Arc<MetricsCollector>,
    config: Config,
}

impl Core {
    /// Build a core with the default keyword classifier. Use
    /// [`Core::with_classifier`] to plug in a model-backed one.
    pub fn new(config: Config) -> OrchestratorResult<Arc<Self>> {
        Self::with_classifier(config, Arc::new(KeywordClassifier))
    }

    pub fn with_classifier(config: Config, classifier: Arc<dyn Classifier>) -> OrchestratorResult<Arc<Self>> {
        config.validate()?;

        let events = EventBus::new(config.adapter_queue_capacity, config.critical_block_grace);
        let metrics = Arc::new(MetricsCollector::new());
        let approvals = Arc::new(ApprovalGate::new(events.clone(), metrics.clone()));
        let workers = Arc::new(WorkerPool::new(
            config.load_balancing_strategy,
            config.heartbeat_interval,
            config.offline_after(),
            config.retry_budget,
            events.clone(),
            metrics.clone(),
        ));
        let executor = Arc::new(ExecutorRegistry::new(workers.clone(), config.step_timeout_default));
        let engine = Arc::new(WorkflowEngine::new(
            events.clone(),
            approvals.clone(),
            executor,
            metrics.clone(),
            classifier,
            config.clone(),
        ));
        workers.spawn_heartbeat_monitor();

        Ok(Arc::new(Self {
            events,
            approvals,
            workers,
            engine,
            metrics,
            config,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn submit_workflow(&self, request: serde_json::Value) -> OrchestratorResult<String> {
        self.engine.submit(request).await
    }

    pub async fn submit_workflow_with_auto_approve(&self, request: serde_json::Value, auto_approve: bool) -> OrchestratorResult<String> {
        self.engine.submit_with_auto_approve(request, auto_approve).await
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.engine.get(workflow_id).await
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.engine.list().await
    }

    pub async fn cancel_workflow(&self, workflow_id: &str) -> OrchestratorResult<()> {
        self.engine.cancel(workflow_id).await
    }

    pub async fn pair_worker(&self, worker: WorkerConfig) -> OrchestratorResult<String> {
        self.workers.pair(worker).await
    }

    pub async fn unpair_worker(&self, worker_id: &str) -> OrchestratorResult<()> {
        self.workers.unpair(worker_id).await
    }

    pub async fn worker_heartbeat(&self, worker_id: &str, metrics: serde_json::Value) -> OrchestratorResult<()> {
        self.workers.heartbeat(worker_id, metrics).await
    }

    /// Prometheus text-exposition rendering of everything recorded so far.
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }
}
