//! Recognized configuration options (spec.md §6).
//!
//! Loading configuration from a file, environment, or CLI is out of scope
//! (spec.md §1 lists "configuration loading" among the external collaborators
//! the core does not own) — this module only defines the shape and validates
//! it. The embedding host constructs a [`Config`] programmatically.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::workers::balancer::LoadBalancingStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deadline applied when a step registers for approval without its own.
    pub approval_timeout_default: Duration,
    /// Interval at which paired workers are expected to heartbeat.
    pub heartbeat_interval: Duration,
    /// Missed heartbeats tolerated before `online -> degraded -> offline`.
    /// The spec fixes the transition thresholds at 1x and 3x the interval;
    /// this field exists so a host can see the configured interval count.
    pub heartbeat_miss_threshold: u32,
    /// Worker Pool dispatch strategy.
    pub load_balancing_strategy: LoadBalancingStrategy,
    /// Admission cap on total in-flight workflows.
    pub max_concurrent_workflows: usize,
    /// Bounded capacity of each channel adapter's per-client queue.
    pub adapter_queue_capacity: usize,
    /// Grace period a producer blocks on a full queue for a critical message
    /// before the adapter is dropped.
    pub critical_block_grace: Duration,
    /// Max Worker Pool dispatch retries per step before `no_capacity`.
    pub retry_budget: u32,
    /// Default per-step execution timeout (local or remote dispatch).
    pub step_timeout_default: Duration,
    /// Timeout applied while a step is `waiting_approval`.
    pub approval_step_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            approval_timeout_default: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_miss_threshold: 3,
            load_balancing_strategy: LoadBalancingStrategy::LeastLoaded,
            max_concurrent_workflows: 256,
            adapter_queue_capacity: 1024,
            critical_block_grace: Duration::from_millis(500),
            retry_budget: 2,
            step_timeout_default: Duration::from_secs(5 * 60),
            approval_step_timeout: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Reject configurations that cannot be operated safely.
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.approval_timeout_default.is_zero() {
            return Err(OrchestratorError::Validation(
                "approval_timeout_default must be non-zero".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(OrchestratorError::Validation(
                "heartbeat_interval must be non-zero".into(),
            ));
        }
        if self.heartbeat_miss_threshold == 0 {
            return Err(OrchestratorError::Validation(
                "heartbeat_miss_threshold must be at least 1".into(),
            ));
        }
        if self.max_concurrent_workflows == 0 {
            return Err(OrchestratorError::Validation(
                "max_concurrent_workflows must be at least 1".into(),
            ));
        }
        if self.adapter_queue_capacity == 0 {
            return Err(OrchestratorError::Validation(
                "adapter_queue_capacity must be at least 1".into(),
            ));
        }
        if self.step_timeout_default.is_zero() {
            return Err(OrchestratorError::Validation(
                "step_timeout_default must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// `3 × heartbeat_interval`, the point at which a `degraded` worker with
    /// no heartbeat is moved to `offline` (spec.md §4.4).
    pub fn offline_after(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let mut config = Config::default();
        config.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn offline_after_is_three_times_interval() {
        let config = Config::default();
        assert_eq!(config.offline_after(), config.heartbeat_interval * 3);
    }
}
