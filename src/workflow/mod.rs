//! Workflow Engine (spec.md §4.1): classification, planning, step execution,
//! and the Workflow/Step state machines.

mod classify;
mod engine;
mod plan;
mod step;

pub use classify::{Classification, Classifier, KeywordClassifier};
pub use engine::{Workflow, WorkflowEngine, WorkflowStatus};
pub use plan::build_plan;
pub use step::{Step, StepStatus};
