//! Reward shaping for observed outcomes.
//!
//! Failure costs more than success earns; that asymmetry keeps the learned
//! policy risk-averse and must not be tuned away.

use serde::Serialize;

use crate::work::OutcomeRecord;

const SUCCESS_REWARD: f64 = 10.0;
const FAILURE_PENALTY: f64 = -15.0;

const FAST_RESOLUTION_DAYS: i64 = 7;
const SLOW_RESOLUTION_DAYS: i64 = 30;
const TIME_BONUS: f64 = 5.0;

const UNDER_BUDGET_RATIO: f64 = 0.8;
const OVER_BUDGET_RATIO: f64 = 1.5;
const COST_BONUS: f64 = 3.0;

/// Cap on the reward a single learned document can earn.
pub const MAX_DOCUMENT_REWARD: f64 = 5.0;

/// The three additive terms of an outcome reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardBreakdown {
    pub success: f64,
    pub time: f64,
    pub cost: f64,
}

impl RewardBreakdown {
    #[must_use]
    pub fn of(outcome: &OutcomeRecord) -> Self {
        let success = if outcome.was_successful {
            SUCCESS_REWARD
        } else {
            FAILURE_PENALTY
        };

        let time = if outcome.resolution_days < FAST_RESOLUTION_DAYS {
            TIME_BONUS
        } else if outcome.resolution_days > SLOW_RESOLUTION_DAYS {
            -TIME_BONUS
        } else {
            0.0
        };

        let cost = if outcome.actual_cost < outcome.expected_cost * UNDER_BUDGET_RATIO {
            COST_BONUS
        } else if outcome.actual_cost > outcome.expected_cost * OVER_BUDGET_RATIO {
            -COST_BONUS
        } else {
            0.0
        };

        Self {
            success,
            time,
            cost,
        }
    }

    /// Unweighted, unnormalized sum.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.success + self.time + self.cost
    }
}

/// Scores an outcome; ranges from -23.0 to +18.0.
#[must_use]
pub fn compute_reward(outcome: &OutcomeRecord) -> f64 {
    RewardBreakdown::of(outcome).total()
}

/// Reward for a document of `content_chars` characters: one point per
/// thousand characters, capped at [`MAX_DOCUMENT_REWARD`].
#[must_use]
pub fn document_reward(content_chars: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let raw = content_chars as f64 / 1000.0;
    raw.min(MAX_DOCUMENT_REWARD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ok: bool, days: i64, expected: f64, actual: f64) -> OutcomeRecord {
        OutcomeRecord {
            was_successful: ok,
            resolution_days: days,
            expected_cost: expected,
            actual_cost: actual,
        }
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn best_and_worst_cases_bound_the_range() {
        assert_eq!(compute_reward(&outcome(true, 2, 1000.0, 500.0)), 18.0);
        assert_eq!(compute_reward(&outcome(false, 45, 1000.0, 2000.0)), -23.0);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn middle_bands_contribute_nothing() {
        let b = RewardBreakdown::of(&outcome(true, 7, 1000.0, 1000.0));
        assert_eq!(b.time, 0.0);
        assert_eq!(b.cost, 0.0);
        assert_eq!(b.total(), 10.0);

        let b = RewardBreakdown::of(&outcome(true, 30, 1000.0, 1500.0));
        assert_eq!(b.time, 0.0);
        assert_eq!(b.cost, 0.0);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn budget_boundaries_are_strict() {
        assert_eq!(RewardBreakdown::of(&outcome(true, 10, 1000.0, 800.0)).cost, 0.0);
        assert_eq!(RewardBreakdown::of(&outcome(true, 10, 1000.0, 799.0)).cost, 3.0);
        assert_eq!(RewardBreakdown::of(&outcome(true, 10, 1000.0, 1501.0)).cost, -3.0);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn document_reward_is_capped() {
        assert_eq!(document_reward(0), 0.0);
        assert_eq!(document_reward(2500), 2.5);
        assert_eq!(document_reward(80_000), MAX_DOCUMENT_REWARD);
    }
}
