use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of topics the core publishes (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    WorkflowCreated,
    WorkflowStepStarted,
    WorkflowStepCompleted,
    WorkflowStepFailed,
    WorkflowApprovalRequired,
    WorkflowApprovalResolved,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    WorkflowTimeout,
    NpuWorkerAdded,
    NpuWorkerRemoved,
    NpuWorkerUpdated,
    NpuWorkerStatusChanged,
    NpuWorkerMetricsUpdated,
}

impl Topic {
    pub const ALL: [Topic; 15] = [
        Topic::WorkflowCreated,
        Topic::WorkflowStepStarted,
        Topic::WorkflowStepCompleted,
        Topic::WorkflowStepFailed,
        Topic::WorkflowApprovalRequired,
        Topic::WorkflowApprovalResolved,
        Topic::WorkflowCompleted,
        Topic::WorkflowFailed,
        Topic::WorkflowCancelled,
        Topic::WorkflowTimeout,
        Topic::NpuWorkerAdded,
        Topic::NpuWorkerRemoved,
        Topic::NpuWorkerUpdated,
        Topic::NpuWorkerStatusChanged,
        Topic::NpuWorkerMetricsUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::WorkflowCreated => "workflow.created",
            Topic::WorkflowStepStarted => "workflow.step.started",
            Topic::WorkflowStepCompleted => "workflow.step.completed",
            Topic::WorkflowStepFailed => "workflow.step.failed",
            Topic::WorkflowApprovalRequired => "workflow.approval.required",
            Topic::WorkflowApprovalResolved => "workflow.approval.resolved",
            Topic::WorkflowCompleted => "workflow.completed",
            Topic::WorkflowFailed => "workflow.failed",
            Topic::WorkflowCancelled => "workflow.cancelled",
            Topic::WorkflowTimeout => "workflow.timeout",
            Topic::NpuWorkerAdded => "npu.worker.added",
            Topic::NpuWorkerRemoved => "npu.worker.removed",
            Topic::NpuWorkerUpdated => "npu.worker.updated",
            Topic::NpuWorkerStatusChanged => "npu.worker.status.changed",
            Topic::NpuWorkerMetricsUpdated => "npu.worker.metrics.updated",
        }
    }

    fn segments(&self) -> Vec<&'static str> {
        self.as_str().split('.').collect()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscription pattern: an exact topic name, or a `*` segment matching
/// any single topic segment at that position (spec.md §4.1 — "patterns are
/// exact topic names or single-level wildcards").
#[derive(Debug, Clone)]
pub struct TopicPattern {
    segments: Vec<String>,
}

impl TopicPattern {
    pub fn exact(topic: Topic) -> Self {
        Self {
            segments: topic.as_str().split('.').map(str::to_string).collect(),
        }
    }

    /// Parse a dotted pattern such as `"workflow.step.*"` or `"npu.*.status.changed"`.
    pub fn parse(pattern: &str) -> Self {
        Self {
            segments: pattern.split('.').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        let topic_segments = topic.segments();
        if topic_segments.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(topic_segments.iter())
            .all(|(pattern_seg, topic_seg)| pattern_seg == "*" || pattern_seg == topic_seg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_its_topic() {
        let pattern = TopicPattern::exact(Topic::WorkflowCompleted);
        assert!(pattern.matches(&Topic::WorkflowCompleted));
        assert!(!pattern.matches(&Topic::WorkflowFailed));
    }

    #[test]
    fn single_level_wildcard_matches_same_length_topics() {
        let pattern = TopicPattern::parse("workflow.step.*");
        assert!(pattern.matches(&Topic::WorkflowStepStarted));
        assert!(pattern.matches(&Topic::WorkflowStepCompleted));
        assert!(!pattern.matches(&Topic::WorkflowCreated));
    }

    #[test]
    fn wildcard_does_not_cross_segment_count() {
        let pattern = TopicPattern::parse("workflow.*");
        assert!(!pattern.matches(&Topic::WorkflowStepStarted));
        assert!(pattern.matches(&Topic::WorkflowCreated));
    }
}
