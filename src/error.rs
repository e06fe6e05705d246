//! Error taxonomy for the orchestration core.
//!
//! Variants name *kinds*, not wrapped library types — callers classify into
//! one of these before the error crosses a component boundary, matching the
//! propagation policy in the spec (repairable errors recover locally, fatal
//! ones surface to the workflow as `failed`).

use thiserror::Error;

/// Result type used throughout the crate.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    /// Malformed request; rejected synchronously, before planning.
    #[error("validation error: {0}")]
    Validation(String),

    /// Classifier or planner failed; workflow fails before `executing`.
    #[error("planning error: {0}")]
    Planning(String),

    /// User denied a step approval.
    #[error("approval denied for step {step_id}")]
    ApprovalDenied { step_id: String },

    /// Approval deadline passed before a decision arrived.
    #[error("approval timed out for step {step_id}")]
    ApprovalTimeout { step_id: String },

    /// Executor error whose description suggests an alternative approach.
    #[error("repairable step error: {message}")]
    StepExecutionRepairable {
        message: String,
        suggestion: String,
    },

    /// Out-of-memory or allocator-level failure; not repairable.
    #[error("fatal step error: {0}")]
    StepExecutionFatal(String),

    /// Worker Pool could not acquire a healthy worker within the retry budget.
    #[error("no capacity available after {attempts} attempt(s)")]
    NoCapacity { attempts: u32 },

    /// RPC error talking to a worker.
    #[error("worker transport error to {worker_id}: {message}")]
    WorkerTransport { worker_id: String, message: String },

    /// Caller requested stop.
    #[error("operation cancelled")]
    Cancellation,

    /// An approval/pairing registration collided with an existing entry.
    #[error("already pending")]
    AlreadyPending,

    /// A resolve/pair call arrived after the entry already settled.
    #[error("already resolved")]
    AlreadyResolved,

    /// Referenced workflow/step/worker does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl OrchestratorError {
    /// A short `{code, message, suggestion?}` triple for terminal events,
    /// per spec.md §7 ("user-visible failure behavior").
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation",
            OrchestratorError::Planning(_) => "planning",
            OrchestratorError::ApprovalDenied { .. } => "approval_denied",
            OrchestratorError::ApprovalTimeout { .. } => "approval_timeout",
            OrchestratorError::StepExecutionRepairable { .. } => "step_execution_repairable",
            OrchestratorError::StepExecutionFatal(_) => "step_execution_fatal",
            OrchestratorError::NoCapacity { .. } => "no_capacity",
            OrchestratorError::WorkerTransport { .. } => "worker_transport",
            OrchestratorError::Cancellation => "cancellation",
            OrchestratorError::AlreadyPending => "already_pending",
            OrchestratorError::AlreadyResolved => "already_resolved",
            OrchestratorError::NotFound(_) => "not_found",
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            OrchestratorError::StepExecutionRepairable { suggestion, .. } => {
                Some(suggestion.as_str())
            }
            _ => None,
        }
    }
}

/// Patterns recognized in an executor's stderr/error text that suggest a
/// retry with an alternative approach is worth attempting. The category set
/// is fixed by spec.md §7; the exact patterns are an implementer's choice
/// which the spec notes the original enumerates as examples.
const REPAIRABLE_PATTERNS: &[(&str, &str)] = &[
    ("no such file", "verify the path exists before retrying"),
    ("permission denied", "retry with elevated or corrected permissions"),
    ("command not found", "install the missing tool or use an alternative command"),
    ("timeout", "retry with a longer timeout or smaller scope"),
    ("connection refused", "verify the target is reachable and retry"),
    ("syntax error", "correct the command syntax and retry"),
    ("not a directory", "verify the target path is a directory"),
    ("no space left", "free disk space before retrying"),
];

/// Classify a raw executor error message as repairable or fatal.
///
/// Returns `Some(suggestion)` when `message` matches one of the known
/// repairable patterns (case-insensitive substring match), `None` when no
/// pattern matches and the error should be treated as fatal.
pub fn classify_stderr(message: &str) -> Option<&'static str> {
    let lowered = message.to_lowercase();
    REPAIRABLE_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, suggestion)| *suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("bash: foo: command not found" => Some("install the missing tool or use an alternative command"))]
    #[test_case("open(/tmp/x): No such file or directory" => Some("verify the path exists before retrying"))]
    #[test_case("Connection refused (os error 111)" => Some("verify the target is reachable and retry"))]
    #[test_case("Segmentation fault" => None)]
    #[test_case("out of memory" => None)]
    fn classifies_known_patterns(message: &str) -> Option<&'static str> {
        classify_stderr(message)
    }

    #[test]
    fn error_code_matches_taxonomy() {
        let err = OrchestratorError::NoCapacity { attempts: 3 };
        assert_eq!(err.code(), "no_capacity");
        assert!(err.suggestion().is_none());
    }

    #[test]
    fn repairable_error_carries_suggestion() {
        let err = OrchestratorError::StepExecutionRepairable {
            message: "command not found".into(),
            suggestion: "install the missing tool".into(),
        };
        assert_eq!(err.suggestion(), Some("install the missing tool"));
    }
}
