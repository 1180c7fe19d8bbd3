//! Running counters of the decision engine.

use serde::{Deserialize, Serialize};

/// Counters updated by every learning call. Reset together with knowledge.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Metrics {
    pub decisions_total: u64,
    pub decisions_correct: u64,
    pub cumulative_reward: f64,
    pub web_learning_events: u64,
}

impl Metrics {
    /// Share of learned outcomes that were successful (0.0 to 1.0).
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            self.decisions_correct as f64 / self.decisions_total.max(1) as f64
        }
    }

    pub(crate) fn record_outcome(&mut self, successful: bool, reward: f64) {
        self.decisions_total += 1;
        if successful {
            self.decisions_correct += 1;
        }
        self.cumulative_reward += reward;
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_total: self.decisions_total,
            decisions_correct: self.decisions_correct,
            cumulative_reward: self.cumulative_reward,
            web_learning_events: self.web_learning_events,
            accuracy: self.accuracy(),
        }
    }
}

/// Serializable view of [`Metrics`] including the derived accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub decisions_total: u64,
    pub decisions_correct: u64,
    pub cumulative_reward: f64,
    pub web_learning_events: u64,
    pub accuracy: f64,
}
