//! Ingress surface (spec.md §6): transport-agnostic request/response shapes
//! and the trait a host's HTTP/WebSocket/gRPC layer adapts to. No server
//! code lives here — wiring an actual listener is the embedding host's job.

use crate::approval::Decision;
use crate::error::OrchestratorResult;
use crate::workers::WorkerConfig;
use crate::workflow::Workflow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub payload: serde_json::Value,
    /// Skip every approval gate in the resulting plan (spec.md §6
    /// `workflow.execute {user_message, auto_approve?}`).
    #[serde(default)]
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowResponse {
    pub workflow_id: String,
}

/// Read-model view enriched with progress, per SPEC_FULL.md §11.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowView {
    pub workflow: Workflow,
    pub current_step: usize,
    pub total_steps: usize,
    pub current_step_description: Option<String>,
}

impl From<Workflow> for WorkflowView {
    fn from(workflow: Workflow) -> Self {
        let (current_step, total_steps, description) = workflow.progress();
        let current_step_description = description.map(str::to_string);
        Self {
            workflow,
            current_step,
            total_steps,
            current_step_description,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecisionRequest {
    pub workflow_id: String,
    pub step_id: String,
    pub approved: bool,
    pub user_input: Option<serde_json::Value>,
}

impl ApprovalDecisionRequest {
    pub fn into_decision(self) -> Decision {
        if self.approved {
            Decision::Approved { user_input: self.user_input }
        } else {
            Decision::Denied { user_input: self.user_input }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub metrics: serde_json::Value,
}

/// Transport-agnostic ingress surface. A host's HTTP router, WebSocket
/// server, or CLI implements this by delegating to a [`crate::core::Core`].
#[async_trait]
pub trait IngressApi: Send + Sync {
    async fn create_workflow(&self, request: CreateWorkflowRequest) -> OrchestratorResult<CreateWorkflowResponse>;
    async fn get_workflow(&self, workflow_id: &str) -> Option<WorkflowView>;
    async fn list_workflows(&self) -> Vec<WorkflowView>;
    async fn cancel_workflow(&self, workflow_id: &str) -> OrchestratorResult<()>;
    async fn pending_approvals(&self, workflow_id: &str) -> Vec<String>;
    async fn resolve_approval(&self, request: ApprovalDecisionRequest) -> OrchestratorResult<()>;
    async fn pair_worker(&self, worker: WorkerConfig) -> OrchestratorResult<String>;
    async fn unpair_worker(&self, worker_id: &str) -> OrchestratorResult<()>;
    async fn worker_heartbeat(&self, request: HeartbeatRequest) -> OrchestratorResult<()>;
    fn metrics_text(&self) -> String;
}

#[async_trait]
impl IngressApi for crate::core::Core {
    async fn create_workflow(&self, request: CreateWorkflowRequest) -> OrchestratorResult<CreateWorkflowResponse> {
        let workflow_id = self.submit_workflow_with_auto_approve(request.payload, request.auto_approve).await?;
        Ok(CreateWorkflowResponse { workflow_id })
    }

    async fn get_workflow(&self, workflow_id: &str) -> Option<WorkflowView> {
        self.get_workflow(workflow_id).await.map(WorkflowView::from)
    }

    async fn list_workflows(&self) -> Vec<WorkflowView> {
        self.list_workflows().await.into_iter().map(WorkflowView::from).collect()
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> OrchestratorResult<()> {
        Core::cancel_workflow(self, workflow_id).await
    }

    async fn pending_approvals(&self, workflow_id: &str) -> Vec<String> {
        self.engine.pending_approvals(workflow_id)
    }

    async fn resolve_approval(&self, request: ApprovalDecisionRequest) -> OrchestratorResult<()> {
        let workflow_id = request.workflow_id.clone();
        let step_id = request.step_id.clone();
        self.approvals.resolve(&workflow_id, &step_id, request.into_decision()).await
    }

    async fn pair_worker(&self, worker: WorkerConfig) -> OrchestratorResult<String> {
        Core::pair_worker(self, worker).await
    }

    async fn unpair_worker(&self, worker_id: &str) -> OrchestratorResult<()> {
        Core::unpair_worker(self, worker_id).await
    }

    async fn worker_heartbeat(&self, request: HeartbeatRequest) -> OrchestratorResult<()> {
        Core::worker_heartbeat(self, &request.worker_id, request.metrics).await
    }

    fn metrics_text(&self) -> String {
        Core::metrics_text(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::Core;

    #[tokio::test]
    async fn ingress_trait_round_trips_through_core() {
        let core = Core::new(Config::default()).unwrap();
        let response = core
            .create_workflow(CreateWorkflowRequest {
                payload: serde_json::json!({ "description": "say hello" }),
                auto_approve: false,
            })
            .await
            .unwrap();
        assert!(IngressApi::get_workflow(core.as_ref(), &response.workflow_id).await.is_some());
    }
}
