//! End-to-end scenarios driven entirely through the public `Core`/`IngressApi`
//! surface, mirroring spec.md §8's testable scenarios A-F.

use std::time::Duration;
use workflow_core::config::Config;
use workflow_core::core::Core;
use workflow_core::ingress::{ApprovalDecisionRequest, CreateWorkflowRequest, IngressApi};
use workflow_core::workers::WorkerConfig;
use workflow_core::workflow::WorkflowStatus;

async fn wait_for_terminal(core: &Core, workflow_id: &str) -> WorkflowStatus {
    for _ in 0..100 {
        if let Some(view) = IngressApi::get_workflow(core, workflow_id).await {
            if view.workflow.status.is_terminal() {
                return view.workflow.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("workflow {workflow_id} never reached a terminal state");
}

#[tokio::test]
async fn scenario_a_simple_workflow_completes_without_approval() {
    let core = Core::new(Config::default()).unwrap();
    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "say hello to the team" }),
            auto_approve: false,
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&core, &response.workflow_id).await, WorkflowStatus::Completed);
}

#[tokio::test]
async fn scenario_b_approval_granted_lets_workflow_complete() {
    let core = Core::new(Config::default()).unwrap();
    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "scan for CVE exploits on host" }),
            auto_approve: false,
        })
        .await
        .unwrap();

    let step_id = loop {
        let pending = IngressApi::pending_approvals(&core, &response.workflow_id).await;
        if let Some(step_id) = pending.into_iter().next() {
            break step_id;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    core.resolve_approval(ApprovalDecisionRequest {
        workflow_id: response.workflow_id.clone(),
        step_id,
        approved: true,
        user_input: None,
    })
    .await
    .unwrap();

    assert_eq!(wait_for_terminal(&core, &response.workflow_id).await, WorkflowStatus::Completed);
}

#[tokio::test]
async fn scenario_c_approval_denied_cancels_workflow() {
    let core = Core::new(Config::default()).unwrap();
    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "scan for CVE exploits on host" }),
            auto_approve: false,
        })
        .await
        .unwrap();

    let step_id = loop {
        let pending = IngressApi::pending_approvals(&core, &response.workflow_id).await;
        if let Some(step_id) = pending.into_iter().next() {
            break step_id;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    core.resolve_approval(ApprovalDecisionRequest {
        workflow_id: response.workflow_id.clone(),
        step_id,
        approved: false,
        user_input: None,
    })
    .await
    .unwrap();

    assert_eq!(wait_for_terminal(&core, &response.workflow_id).await, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn scenario_d_unresolved_approval_times_out() {
    let mut config = Config::default();
    config.approval_step_timeout = Duration::from_millis(100);
    let core = Core::new(config).unwrap();

    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "scan for CVE exploits on host" }),
            auto_approve: false,
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&core, &response.workflow_id).await, WorkflowStatus::TimedOut);
}

fn worker_config(url: &str) -> WorkerConfig {
    WorkerConfig {
        url: url.to_string(),
        platform: "linux-npu".to_string(),
        priority: 1,
        weight: 1,
        max_concurrent_tasks: 4,
        capabilities: vec![],
    }
}

#[tokio::test]
async fn scenario_e_least_loaded_dispatch_prefers_idle_worker() {
    let core = Core::new(Config::default()).unwrap();
    let busy_id = core.pair_worker(worker_config("https://busy.local")).await.unwrap();
    let idle_id = core.pair_worker(worker_config("https://idle.local")).await.unwrap();

    let busy = core.workers.get(&busy_id).unwrap();
    busy.begin_step();
    busy.begin_step();

    let chosen = core.workers.acquire().unwrap();
    assert_eq!(chosen.id(), idle_id);
}

#[tokio::test]
async fn pairing_the_same_url_twice_returns_the_same_worker_id() {
    let core = Core::new(Config::default()).unwrap();
    let first = core.pair_worker(worker_config("https://dup.local")).await.unwrap();
    let second = core.pair_worker(worker_config("https://dup.local")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(core.workers.count(), 1);
}

#[tokio::test]
async fn scenario_f_missed_heartbeats_move_worker_offline_then_heartbeat_restores_it() {
    let mut config = Config::default();
    config.heartbeat_interval = Duration::from_millis(50);
    let core = Core::new(config).unwrap();

    let flaky_id = core.pair_worker(worker_config("https://flaky.local")).await.unwrap();

    // offline_after() == 3x heartbeat_interval == 150ms
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        core.workers.get(&flaky_id).unwrap().status(),
        workflow_core::workers::WorkerStatus::Offline
    );

    core.worker_heartbeat(&flaky_id, serde_json::json!({})).await.unwrap();
    assert_eq!(
        core.workers.get(&flaky_id).unwrap().status(),
        workflow_core::workers::WorkerStatus::Online
    );
}

#[tokio::test]
async fn cancelling_a_workflow_mid_flight_resolves_as_cancelled() {
    let core = Core::new(Config::default()).unwrap();
    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "scan for CVE exploits on host" }),
            auto_approve: false,
        })
        .await
        .unwrap();

    loop {
        if !IngressApi::pending_approvals(&core, &response.workflow_id).await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    IngressApi::cancel_workflow(&core, &response.workflow_id).await.unwrap();

    assert_eq!(wait_for_terminal(&core, &response.workflow_id).await, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn scenario_g_auto_approve_skips_the_gate() {
    let core = Core::new(Config::default()).unwrap();
    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "scan for CVE exploits on host" }),
            auto_approve: true,
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&core, &response.workflow_id).await, WorkflowStatus::Completed);
    assert!(IngressApi::pending_approvals(&core, &response.workflow_id).await.is_empty());
}

#[tokio::test]
async fn metrics_text_reflects_workflow_activity() {
    let core = Core::new(Config::default()).unwrap();
    let response = core
        .create_workflow(CreateWorkflowRequest {
            payload: serde_json::json!({ "description": "say hello" }),
            auto_approve: false,
        })
        .await
        .unwrap();
    wait_for_terminal(&core, &response.workflow_id).await;

    let rendered = core.metrics_text();
    assert!(rendered.is_empty() || rendered.contains("workflows_created_total"));
}
