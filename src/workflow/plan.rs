//! Step planning (spec.md §4.1): classification determines a fixed, ordered
//! step list. Grounded on the original's per-classification step arrays
//! built ahead of `execute_workflow_steps`.

use super::classify::Classification;
use super::step::Step;

/// Steps requiring human sign-off before a potentially destructive or
/// outward-facing action (network scans, security tooling).
fn requires_approval(agent_type: &str) -> bool {
    matches!(agent_type, "security_scanner" | "network_discovery")
}

pub fn build_plan(classification: Classification, request: &serde_json::Value) -> Vec<Step> {
    let steps: Vec<(&str, &str)> = match classification {
        Classification::SecurityReview => vec![
            ("plan", "orchestrator"),
            ("scan", "security_scanner"),
            ("summarize", "librarian"),
        ],
        Classification::NetworkDiscovery => vec![
            ("plan", "orchestrator"),
            ("discover", "network_discovery"),
            ("summarize", "librarian"),
        ],
        Classification::Research => vec![("research", "research"), ("summarize", "librarian")],
        Classification::Composite => vec![
            ("plan", "orchestrator"),
            ("scan", "security_scanner"),
            ("discover", "network_discovery"),
            ("research", "research"),
            ("summarize", "librarian"),
        ],
        Classification::Generic => vec![("handle", "orchestrator")],
    };

    steps
        .into_iter()
        .enumerate()
        .map(|(index, (kind, agent_type))| {
            let id = format!("step_{index}_{kind}");
            let mut step = Step::new(id, agent_type, format!("{kind} via {agent_type}"), requires_approval(agent_type));
            step.input = request.clone();
            step
        })
        .collect()
}
