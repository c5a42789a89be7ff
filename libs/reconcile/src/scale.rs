//! Target-count scale planning.

/// Convergence status of a container pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Running count equals the target and nothing is in flight.
    Converged,

    /// Requests or releases are in flight toward the target.
    Converging,

    /// The pool is above target and every remaining candidate is protected;
    /// it cannot shrink further until the caller changes its inputs.
    Diverged,
}

impl ConvergenceStatus {
    /// Classify a pool from its counts.
    ///
    /// `blocked` is the shortfall reported by the last plan: how many releases
    /// were wanted but had no eligible candidate.
    pub fn evaluate(target: u32, running: u32, requested: u32, releasing: u32, blocked: u32) -> Self {
        if requested == 0 && releasing == 0 && running == target {
            Self::Converged
        } else if requested == 0 && releasing == 0 && blocked > 0 {
            Self::Diverged
        } else {
            Self::Converging
        }
    }

    /// Returns true if the pool has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the pool is still converging.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }
}

/// Actions that move a pool from its current count to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePlan<R, C> {
    /// Number of new container requests to submit.
    pub to_request: u32,

    /// Outstanding requests to withdraw, newest first.
    pub to_cancel: Vec<R>,

    /// Running containers to release, in candidate order.
    pub to_release: Vec<C>,

    /// Releases wanted but not possible because no eligible candidate remained.
    pub shortfall: u32,
}

impl<R, C> ScalePlan<R, C> {
    /// True if the plan does nothing.
    pub fn is_noop(&self) -> bool {
        self.to_request == 0 && self.to_cancel.is_empty() && self.to_release.is_empty()
    }
}

/// Plan how to reach `target`.
///
/// - `outstanding`: requests not yet granted, oldest first.
/// - `running`: number of running containers (all of them, protected or not).
/// - `eligible`: running containers that may be released, in release order.
///
/// Current count is `outstanding.len() + running`. When shrinking, outstanding
/// requests are withdrawn before any running container is released.
pub fn plan_scale<R: Clone, C: Clone>(
    target: u32,
    outstanding: &[R],
    running: u32,
    eligible: &[C],
) -> ScalePlan<R, C> {
    let current = outstanding.len() as u32 + running;

    if target >= current {
        return ScalePlan {
            to_request: target - current,
            to_cancel: Vec::new(),
            to_release: Vec::new(),
            shortfall: 0,
        };
    }

    let excess = (current - target) as usize;
    let to_cancel: Vec<R> = outstanding.iter().rev().take(excess).cloned().collect();
    let remaining = excess - to_cancel.len();
    let to_release: Vec<C> = eligible.iter().take(remaining).cloned().collect();
    let shortfall = (remaining - to_release.len()) as u32;

    ScalePlan {
        to_request: 0,
        to_cancel,
        to_release,
        shortfall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scale_up_from_zero() {
        let plan = plan_scale::<u64, &str>(10, &[], 0, &[]);
        assert_eq!(plan.to_request, 10);
        assert!(plan.to_cancel.is_empty());
        assert!(plan.to_release.is_empty());
    }

    #[test]
    fn test_scale_up_counts_outstanding() {
        let plan = plan_scale::<u64, &str>(5, &[1, 2], 2, &[]);
        assert_eq!(plan.to_request, 1);
    }

    #[test]
    fn test_equal_is_noop() {
        let plan = plan_scale(3, &[1u64], 2, &["a", "b"]);
        assert!(plan.is_noop());
        assert_eq!(plan.shortfall, 0);
    }

    #[test]
    fn test_shrink_cancels_newest_requests_first() {
        let plan = plan_scale(3, &[1u64, 2, 3], 2, &["a", "b"]);
        assert_eq!(plan.to_cancel, vec![3, 2]);
        assert!(plan.to_release.is_empty());
    }

    #[test]
    fn test_shrink_releases_in_candidate_order() {
        let plan = plan_scale(6, &[] as &[u64], 10, &["c01", "c02", "c09", "c10"]);
        assert_eq!(plan.to_release, vec!["c01", "c02", "c09", "c10"]);
        assert_eq!(plan.shortfall, 0);
    }

    #[test]
    fn test_shrink_stops_at_in_use_floor() {
        // 10 running, 8 protected: only 2 eligible, target 6 wants 4 gone.
        let plan = plan_scale(6, &[] as &[u64], 10, &["c09", "c10"]);
        assert_eq!(plan.to_release, vec!["c09", "c10"]);
        assert_eq!(plan.shortfall, 2);
    }

    #[test]
    fn test_convergence_status() {
        assert!(ConvergenceStatus::evaluate(4, 4, 0, 0, 0).is_converged());
        assert!(ConvergenceStatus::evaluate(4, 2, 2, 0, 0).is_converging());
        assert!(ConvergenceStatus::evaluate(4, 6, 0, 2, 0).is_converging());
        assert_eq!(
            ConvergenceStatus::evaluate(6, 8, 0, 0, 2),
            ConvergenceStatus::Diverged
        );
    }

    proptest! {
        #[test]
        fn plan_reaches_target_or_reports_shortfall(
            target in 0u32..40,
            outstanding in 0usize..20,
            running in 0u32..40,
            eligible_frac in 0u32..=100,
        ) {
            let outstanding: Vec<usize> = (0..outstanding).collect();
            let eligible_count = running * eligible_frac / 100;
            let eligible: Vec<u32> = (0..eligible_count).collect();

            let plan = plan_scale(target, &outstanding, running, &eligible);
            let current = outstanding.len() as u32 + running;
            let after = current + plan.to_request
                - plan.to_cancel.len() as u32
                - plan.to_release.len() as u32;

            prop_assert_eq!(after, target + plan.shortfall);
            prop_assert!(plan.to_release.len() as u32 <= eligible_count);
            prop_assert!(plan.to_request == 0 || plan.to_release.is_empty());
        }
    }
}
