//! Dispatch strategy selection (spec.md §4.4).

use rand::distributions::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize};

use super::{WorkerHandle, WorkerStatus};

/// Strategy a [`super::WorkerPool`] uses to pick among healthy, paired
/// workers for the next dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    Weighted,
    Priority,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::LeastLoaded
    }
}

impl LoadBalancingStrategy {
    /// Select the next worker to dispatch to from a set of `online` workers.
    /// `round_robin_cursor` is advanced by the caller only when this
    /// strategy is `RoundRobin`; other strategies ignore it.
    ///
    /// Tie-break order, per spec.md §4.4: lower `priority` first, then
    /// higher `weight`, then lower worker id (for determinism).
    pub fn select<'a>(
        &self,
        candidates: &'a [WorkerHandle],
        round_robin_cursor: usize,
    ) -> Option<&'a WorkerHandle> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            LoadBalancingStrategy::RoundRobin => {
                candidates.get(round_robin_cursor % candidates.len())
            }
            LoadBalancingStrategy::LeastLoaded => candidates
                .iter()
                .min_by(|a, b| Self::tie_break_f64(a, b, WorkerHandle::load_ratio)),
            LoadBalancingStrategy::Weighted => Self::select_weighted(candidates),
            LoadBalancingStrategy::Priority => candidates
                .iter()
                .min_by(|a, b| Self::tie_break(a, b, |w| w.priority() as i64)),
        }
    }

    /// Probability-proportional-to-weight selection (spec.md §4.4:
    /// "weighted: probability proportional to weight"). Falls back to a
    /// uniform draw if every candidate's weight is zero.
    fn select_weighted(candidates: &[WorkerHandle]) -> Option<&WorkerHandle> {
        let weights: Vec<u32> = candidates.iter().map(|w| w.weight().max(1)).collect();
        let dist = WeightedIndex::new(&weights).ok()?;
        let mut rng = rand::thread_rng();
        candidates.get(dist.sample(&mut rng))
    }

    fn tie_break(
        a: &WorkerHandle,
        b: &WorkerHandle,
        key: impl Fn(&WorkerHandle) -> i64,
    ) -> std::cmp::Ordering {
        key(a)
            .cmp(&key(b))
            .then_with(|| a.priority().cmp(&b.priority()))
            .then_with(|| b.weight().cmp(&a.weight()))
            .then_with(|| a.id().cmp(&b.id()))
    }

    fn tie_break_f64(
        a: &WorkerHandle,
        b: &WorkerHandle,
        key: impl Fn(&WorkerHandle) -> f64,
    ) -> std::cmp::Ordering {
        key(a)
            .total_cmp(&key(b))
            .then_with(|| a.priority().cmp(&b.priority()))
            .then_with(|| b.weight().cmp(&a.weight()))
            .then_with(|| a.id().cmp(&b.id()))
    }

    /// Filter a worker set down to the ones eligible for dispatch: online and
    /// under their configured concurrency cap (spec.md §4.4: "overcommit
    /// beyond max_concurrent_tasks is forbidden").
    pub fn eligible(workers: &[WorkerHandle]) -> Vec<WorkerHandle> {
        workers
            .iter()
            .filter(|w| w.status() == WorkerStatus::Online && w.has_capacity())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerConfig;
    use test_case::test_case;

    fn worker(id: &str, priority: u8, weight: u32, active_steps: usize) -> WorkerHandle {
        let handle = WorkerHandle::new(
            id.to_string(),
            WorkerConfig {
                url: format!("https://{id}.local"),
                platform: "linux-npu".to_string(),
                priority,
                weight,
                max_concurrent_tasks: 100,
                capabilities: vec![],
            },
        );
        handle.set_status(WorkerStatus::Online);
        for _ in 0..active_steps {
            handle.begin_step();
        }
        handle
    }

    #[test_case(LoadBalancingStrategy::LeastLoaded, "w-least" ; "least loaded wins on load ratio")]
    #[test_case(LoadBalancingStrategy::Priority, "w-priority" ; "priority wins on lowest priority value")]
    fn strategy_picks_expected_worker(strategy: LoadBalancingStrategy, expected_id: &str) {
        let candidates = vec![
            worker("w-least", 5, 1, 0),
            worker("w-priority", 1, 1, 3),
            worker("w-weight", 5, 10, 3),
        ];
        let chosen = strategy.select(&candidates, 0).expect("non-empty candidates");
        assert_eq!(chosen.id(), expected_id);
    }

    #[test]
    fn weighted_strategy_favors_higher_weight_over_many_draws() {
        let candidates = vec![worker("heavy", 1, 9, 0), worker("light", 1, 1, 0)];
        let mut heavy_wins = 0;
        for cursor in 0..500 {
            if LoadBalancingStrategy::Weighted.select(&candidates, cursor).unwrap().id() == "heavy" {
                heavy_wins += 1;
            }
        }
        // Expected share is 9/10; assert it clearly dominates without
        // pinning an exact count (this is a stochastic draw).
        assert!(heavy_wins > 350, "heavy-weighted worker won only {heavy_wins}/500 draws");
        assert!(heavy_wins < 500, "light-weighted worker should win at least once in 500 draws");
    }

    #[test]
    fn least_loaded_compares_capacity_ratio_not_raw_count() {
        // w-small has fewer active steps but is proportionally busier.
        let candidates = vec![worker_with_capacity("w-small", 2, 2), worker_with_capacity("w-big", 3, 20)];
        let chosen = LoadBalancingStrategy::LeastLoaded.select(&candidates, 0).unwrap();
        assert_eq!(chosen.id(), "w-big");
    }

    fn worker_with_capacity(id: &str, active_steps: usize, max_concurrent_tasks: usize) -> WorkerHandle {
        let handle = WorkerHandle::new(
            id.to_string(),
            WorkerConfig {
                url: format!("https://{id}.local"),
                platform: "linux-npu".to_string(),
                priority: 1,
                weight: 1,
                max_concurrent_tasks,
                capabilities: vec![],
            },
        );
        handle.set_status(WorkerStatus::Online);
        for _ in 0..active_steps {
            handle.begin_step();
        }
        handle
    }

    #[test]
    fn eligible_excludes_workers_at_capacity() {
        let full = worker_with_capacity("full", 2, 2);
        let idle = worker_with_capacity("idle", 0, 2);
        let eligible = LoadBalancingStrategy::eligible(&[full, idle]);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id(), "idle");
    }

    #[test]
    fn round_robin_cycles_by_cursor() {
        let candidates = vec![worker("a", 1, 1, 0), worker("b", 1, 1, 0), worker("c", 1, 1, 0)];
        let strategy = LoadBalancingStrategy::RoundRobin;
        assert_eq!(strategy.select(&candidates, 0).unwrap().id(), "a");
        assert_eq!(strategy.select(&candidates, 1).unwrap().id(), "b");
        assert_eq!(strategy.select(&candidates, 3).unwrap().id(), "a");
    }

    #[test]
    fn ties_break_on_worker_id() {
        let candidates = vec![worker("z", 1, 1, 0), worker("a", 1, 1, 0)];
        let chosen = LoadBalancingStrategy::LeastLoaded.select(&candidates, 0).unwrap();
        assert_eq!(chosen.id(), "a");
    }

    #[test]
    fn empty_candidates_select_none() {
        let candidates: Vec<WorkerHandle> = vec![];
        assert!(LoadBalancingStrategy::LeastLoaded.select(&candidates, 0).is_none());
    }
}
