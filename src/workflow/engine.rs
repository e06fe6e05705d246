//! Workflow Engine (spec.md §4.1): the per-request state machine, grounded
//! on the original's `execute_workflow_steps` loop — plan, then walk steps
//! in order, suspending at approval gates and surfacing the first fatal
//! failure as the workflow's terminal state.

use super::classify::{Classification, Classifier};
use super::plan::build_plan;
use super::step::Step;
use crate::approval::{ApprovalGate, Decision};
use crate::config::Config;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventBus, Topic};
use crate::executor::ExecutorRegistry;
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Created,
    Executing,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled | WorkflowStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub classification: Classification,
    pub status: WorkflowStatus,
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    pub error: Option<String>,
    /// If true, approval gates are skipped entirely (spec.md §3, §4.6 step
    /// 2b: a step only suspends when `requires_approval && !auto_approve`).
    pub auto_approve: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// `current_step/total_steps` plus the current step's description
    /// (SPEC_FULL.md §11 read-model supplement).
    pub fn progress(&self) -> (usize, usize, Option<&str>) {
        let total = self.steps.len();
        let current_description = self.steps.get(self.current_step_index).map(|step| step.description.as_str());
        (self.current_step_index, total, current_description)
    }
}

pub struct WorkflowEngine {
    workflows: Arc<DashMap<String, Arc<RwLock<Workflow>>>>,
    cancelled: Arc<DashMap<String, Arc<AtomicBool>>>,
    events: EventBus,
    approvals: Arc<ApprovalGate>,
    executor: Arc<ExecutorRegistry>,
    metrics: Arc<MetricsCollector>,
    classifier: Arc<dyn Classifier>,
    config: Config,
}

impl WorkflowEngine {
    pub fn new(
        events: EventBus,
        approvals: Arc<ApprovalGate>,
        executor: Arc<ExecutorRegistry>,
        metrics: Arc<MetricsCollector>,
        classifier: Arc<dyn Classifier>,
        config: Config,
    ) -> Self {
        Self {
            workflows: Arc::new(DashMap::new()),
            cancelled: Arc::new(DashMap::new()),
            events,
            approvals,
            executor,
            metrics,
            classifier,
            config,
        }
    }

    /// Classify, plan, and admit a workflow; spawns its execution and
    /// returns immediately with the new workflow's id.
    pub async fn submit(self: &Arc<Self>, request: serde_json::Value) -> OrchestratorResult<String> {
        self.submit_with_auto_approve(request, false).await
    }

    /// As [`Self::submit`], but lets the caller skip every approval gate in
    /// the resulting plan (spec.md §6 `workflow.execute {auto_approve?}`).
    pub async fn submit_with_auto_approve(self: &Arc<Self>, request: serde_json::Value, auto_approve: bool) -> OrchestratorResult<String> {
        if self.workflows.iter().filter(|e| !e.value().try_read().map(|w| w.status.is_terminal()).unwrap_or(false)).count()
            >= self.config.max_concurrent_workflows
        {
            return Err(OrchestratorError::NoCapacity { attempts: 0 });
        }

        let classification = self.classifier.classify(&request);
        let steps = build_plan(classification, &request);
        if steps.is_empty() {
            return Err(OrchestratorError::Planning("plan produced no steps".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let workflow = Workflow {
            id: id.clone(),
            classification,
            status: WorkflowStatus::Created,
            steps,
            current_step_index: 0,
            error: None,
            auto_approve,
            created_at: now,
            updated_at: now,
        };
        self.workflows.insert(id.clone(), Arc::new(RwLock::new(workflow)));
        self.cancelled.insert(id.clone(), Arc::new(AtomicBool::new(false)));
        self.metrics.workflow_started(classification.as_str());

        self.events
            .publish(
                Topic::WorkflowCreated,
                serde_json::json!({ "workflow_id": id, "classification": classification.as_str() }),
            )
            .await;

        let engine = self.clone();
        let workflow_id = id.clone();
        let span = info_span!("workflow", id = %id);
        tokio::spawn(async move { engine.run(workflow_id).await }.instrument(span));

        Ok(id)
    }

    async fn run(self: Arc<Self>, workflow_id: String) {
        let started_at = Instant::now();
        let handle = match self.workflows.get(&workflow_id) {
            Some(handle) => handle.value().clone(),
            None => return,
        };
        let cancel_flag = self
            .cancelled
            .get(&workflow_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));

        {
            let mut workflow = handle.write().await;
            workflow.status = WorkflowStatus::Executing;
            workflow.updated_at = Utc::now();
        }

        let classification = handle.read().await.classification;
        let total_steps = handle.read().await.steps.len();
        let auto_approve = handle.read().await.auto_approve;

        for index in 0..total_steps {
            if cancel_flag.load(Ordering::Relaxed) {
                self.finish(&handle, WorkflowStatus::Cancelled, None, started_at).await;
                return;
            }

            let (step_id, agent_type, description, requires_approval, input) = {
                let workflow = handle.read().await;
                let step = &workflow.steps[index];
                (step.id.clone(), step.agent_type.clone(), step.description.clone(), step.requires_approval, step.input.clone())
            };

            if requires_approval && !auto_approve {
                {
                    let mut workflow = handle.write().await;
                    workflow.current_step_index = index;
                    workflow.status = WorkflowStatus::WaitingApproval;
                    workflow.steps[index].wait_for_approval();
                }
                let decision = match self.approvals.register(&workflow_id, &step_id, self.config.approval_step_timeout).await {
                    Ok(waiter) => waiter.await_decision().await,
                    Err(_) => Decision::Cancelled,
                };
                {
                    let mut workflow = handle.write().await;
                    workflow.status = WorkflowStatus::Executing;
                }
                match decision {
                    Decision::Approved { .. } => {}
                    Decision::Denied { .. } => {
                        // Denial is a user decision, not a step failure: spec.md §4.6
                        // routes it to `cancelled`, never `failed`.
                        let error = OrchestratorError::ApprovalDenied { step_id: step_id.clone() };
                        self.fail_step(&handle, index, &error.to_string()).await;
                        self.finish(&handle, WorkflowStatus::Cancelled, Some(error.to_string()), started_at).await;
                        return;
                    }
                    Decision::TimedOut => {
                        let error = OrchestratorError::ApprovalTimeout { step_id: step_id.clone() };
                        self.fail_step(&handle, index, &error.to_string()).await;
                        self.finish(&handle, WorkflowStatus::TimedOut, Some(error.to_string()), started_at).await;
                        return;
                    }
                    Decision::Cancelled => {
                        self.finish(&handle, WorkflowStatus::Cancelled, None, started_at).await;
                        return;
                    }
                }
            }

            {
                let mut workflow = handle.write().await;
                workflow.current_step_index = index;
                workflow.steps[index].start();
            }
            self.events
                .publish(
                    Topic::WorkflowStepStarted,
                    serde_json::json!({ "workflow_id": workflow_id, "step_id": step_id, "description": description }),
                )
                .await;

            let step_started_at = Instant::now();
            let outcome = self.executor.dispatch(&agent_type, &input, Some(self.config.step_timeout_default)).await;
            let outcome = match outcome {
                Err(OrchestratorError::StepExecutionRepairable { suggestion, .. }) => {
                    info!(workflow_id = %workflow_id, step_id = %step_id, suggestion = %suggestion, "retrying repairable step error once");
                    self.executor.dispatch(&agent_type, &input, Some(self.config.step_timeout_default)).await
                }
                other => other,
            };
            self.metrics.record_step_duration(&agent_type, step_started_at);

            match outcome {
                Ok(output) => {
                    let mut workflow = handle.write().await;
                    workflow.steps[index].complete(output.result.clone());
                    drop(workflow);
                    self.events
                        .publish(
                            Topic::WorkflowStepCompleted,
                            serde_json::json!({ "workflow_id": workflow_id, "step_id": step_id, "result": output.result }),
                        )
                        .await;
                }
                Err(error) => {
                    self.fail_step(&handle, index, &error.to_string()).await;
                    self.finish(&handle, WorkflowStatus::Failed, Some(error.to_string()), started_at).await;
                    return;
                }
            }
        }

        self.finish(&handle, WorkflowStatus::Completed, None, started_at).await;
    }

    async fn fail_step(&self, handle: &Arc<RwLock<Workflow>>, index: usize, error: &str) {
        let workflow_id = handle.read().await.id.clone();
        let step_id = {
            let mut workflow = handle.write().await;
            workflow.steps[index].fail(error.to_string());
            workflow.steps[index].id.clone()
        };
        self.events
            .publish(
                Topic::WorkflowStepFailed,
                serde_json::json!({ "workflow_id": workflow_id, "step_id": step_id, "error": error }),
            )
            .await;
    }

    /// Settle a workflow into a terminal status: updates its record, routes
    /// the matching terminal topic, and records every terminal-state metric
    /// (completed counter, active-workflow gauge, duration histogram) so no
    /// return path forgets one (SPEC_FULL.md §10).
    async fn finish(&self, handle: &Arc<RwLock<Workflow>>, status: WorkflowStatus, error: Option<String>, started_at: Instant) {
        let (workflow_id, classification) = {
            let mut workflow = handle.write().await;
            workflow.status = status;
            workflow.error = error.clone();
            workflow.updated_at = Utc::now();
            (workflow.id.clone(), workflow.classification)
        };
        let topic = match status {
            WorkflowStatus::Completed => Topic::WorkflowCompleted,
            WorkflowStatus::Failed => Topic::WorkflowFailed,
            WorkflowStatus::Cancelled => Topic::WorkflowCancelled,
            WorkflowStatus::TimedOut => Topic::WorkflowTimeout,
            _ => Topic::WorkflowFailed,
        };
        self.metrics.record_workflow_completed(classification.as_str(), &format!("{status:?}").to_lowercase());
        self.metrics.workflow_finished(classification.as_str());
        self.metrics.record_workflow_duration(classification.as_str(), started_at);
        self.events
            .publish(topic, serde_json::json!({ "workflow_id": workflow_id, "error": error }))
            .await;
    }

    pub async fn cancel(&self, workflow_id: &str) -> OrchestratorResult<()> {
        let flag = self
            .cancelled
            .get(workflow_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))?;
        flag.store(true, Ordering::Relaxed);
        self.approvals.cancel_for_workflow(workflow_id).await;
        Ok(())
    }

    pub async fn get(&self, workflow_id: &str) -> Option<Workflow> {
        match self.workflows.get(workflow_id) {
            Some(entry) => Some(entry.value().read().await.clone()),
            None => None,
        }
    }

    pub async fn list(&self) -> Vec<Workflow> {
        let handles: Vec<Arc<RwLock<Workflow>>> = self.workflows.iter().map(|entry| entry.value().clone()).collect();
        let mut workflows = Vec::with_capacity(handles.len());
        for handle in handles {
            workflows.push(handle.read().await.clone());
        }
        workflows
    }

    pub fn pending_approvals(&self, workflow_id: &str) -> Vec<String> {
        self.approvals.pending_for_workflow(workflow_id)
    }
}
