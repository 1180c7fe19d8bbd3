#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Epsilon-greedy Q-learning over a shared [`KnowledgeStore`].
//!
//! [`QLearningPolicy`] picks among caller-supplied candidate actions and
//! applies one-step Q-learning updates. With probability `epsilon` it explores
//! uniformly at random; otherwise it exploits the best known value. A state
//! whose candidates all read exactly 0.0 is treated as unexplored and also
//! picked at random, so input order never biases the first choice.

pub mod error;
pub mod persist;
pub mod store;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;
use wartlern_core::{ActionId, StateKey};

pub use error::{PolicyError, Result};
pub use persist::{FileBackend, KvBackend, MemoryBackend, PersistConfig, PersistStats, Persister};
pub use store::{KnowledgeSnapshot, KnowledgeStore, Lookup, ValueChange, SNAPSHOT_VERSION};

const DEFAULT_EPSILON: f64 = 0.1;
const DEFAULT_LEARNING_RATE: f64 = 0.1;
const DEFAULT_DISCOUNT_FACTOR: f64 = 0.95;

/// Tunables of the Q-learning policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Probability of an exploration step, between 0.0 and 1.0.
    pub epsilon: f64,
    pub learning_rate: f64,
    pub discount_factor: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            learning_rate: DEFAULT_LEARNING_RATE,
            discount_factor: DEFAULT_DISCOUNT_FACTOR,
        }
    }
}

impl PolicyConfig {
    /// Clamps every field to [0.0, 1.0]; non-finite values fall back to defaults.
    #[must_use]
    pub fn sanitized(self) -> Self {
        fn unit(v: f64, fallback: f64) -> f64 {
            if v.is_finite() {
                v.clamp(0.0, 1.0)
            } else {
                fallback
            }
        }
        Self {
            epsilon: unit(self.epsilon, DEFAULT_EPSILON),
            learning_rate: unit(self.learning_rate, DEFAULT_LEARNING_RATE),
            discount_factor: unit(self.discount_factor, DEFAULT_DISCOUNT_FACTOR),
        }
    }
}

/// Numeric kernel of the value update.
///
/// Kept behind a trait so a vectorized or native implementation can replace
/// the scalar one without touching the policy.
pub trait ValueUpdate: Send + Sync + fmt::Debug {
    fn next_value(&self, current: f64, reward: f64, next_max: f64) -> f64;
}

/// One-step Q-learning: `current + lr * (reward + gamma * next_max - current)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalDifference {
    pub learning_rate: f64,
    pub discount_factor: f64,
}

impl ValueUpdate for TemporalDifference {
    fn next_value(&self, current: f64, reward: f64, next_max: f64) -> f64 {
        current + self.learning_rate * (reward + self.discount_factor * next_max - current)
    }
}

/// Why a particular candidate was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    OnlyCandidate,
    Explore,
    Unexplored,
    Exploit,
}

/// Result of [`QLearningPolicy::select_action`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    /// Position of the chosen action in the candidate list.
    pub index: usize,
    pub action: ActionId,
    /// Stored value of the chosen pair (0.0 when never learned).
    pub value: f64,
    pub why: SelectionReason,
}

/// Epsilon-greedy Q-learning policy.
#[derive(Debug)]
pub struct QLearningPolicy {
    config: PolicyConfig,
    store: Arc<KnowledgeStore>,
    rule: Box<dyn ValueUpdate>,
}

impl QLearningPolicy {
    #[must_use]
    pub fn new(store: Arc<KnowledgeStore>, config: PolicyConfig) -> Self {
        let config = config.sanitized();
        Self {
            config,
            store,
            rule: Box::new(TemporalDifference {
                learning_rate: config.learning_rate,
                discount_factor: config.discount_factor,
            }),
        }
    }

    /// Swaps in another update kernel.
    #[must_use]
    pub fn with_rule(mut self, rule: impl ValueUpdate + 'static) -> Self {
        self.rule = Box::new(rule);
        self
    }

    #[must_use]
    pub fn config(&self) -> PolicyConfig {
        self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Picks one of `candidates` using thread-local randomness.
    pub fn select_action(&self, state: &StateKey, candidates: &[ActionId]) -> Result<Selection> {
        self.select_action_with(&mut rand::thread_rng(), state, candidates)
    }

    /// Picks one of `candidates` drawing randomness from `rng`.
    pub fn select_action_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        state: &StateKey,
        candidates: &[ActionId],
    ) -> Result<Selection> {
        ensure_candidates(candidates)?;
        let lookup = self.store.lookup(state, candidates);
        Ok(self.choose(rng, state, candidates, &lookup.values_or_zero()))
    }

    /// Like [`select_action`](Self::select_action), but exploration is seeded
    /// from the state and the store generation. Repeating a call without an
    /// intervening write yields the same selection.
    pub fn select_action_stable(&self, state: &StateKey, candidates: &[ActionId]) -> Result<Selection> {
        ensure_candidates(candidates)?;
        let lookup = self.store.lookup(state, candidates);
        let mut rng = StdRng::seed_from_u64(stable_seed(state, lookup.generation));
        Ok(self.choose(&mut rng, state, candidates, &lookup.values_or_zero()))
    }

    /// Applies one Q-learning step to `(state, action)` and stores the result.
    pub fn update(
        &self,
        state: &StateKey,
        action: &ActionId,
        reward: f64,
        next_state: &StateKey,
    ) -> Result<ValueChange> {
        if !reward.is_finite() {
            return Err(PolicyError::InvalidInput(format!("reward must be finite, got {reward}")));
        }
        let change = self.store.apply(state, action, next_state, |current, next_max| {
            self.rule.next_value(current, reward, next_max)
        });
        debug!(
            state = %state,
            action = %action,
            reward,
            previous = change.previous,
            value = change.value,
            "q-value updated"
        );
        Ok(change)
    }

    fn choose<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        state: &StateKey,
        candidates: &[ActionId],
        values: &[f64],
    ) -> Selection {
        let pick = |index: usize, why: SelectionReason| Selection {
            index,
            action: candidates[index].clone(),
            value: values[index],
            why,
        };

        if candidates.len() == 1 {
            return pick(0, SelectionReason::OnlyCandidate);
        }

        let selection = if rng.gen::<f64>() < self.config.epsilon {
            pick(rng.gen_range(0..candidates.len()), SelectionReason::Explore)
        } else if values.iter().all(|v| *v == 0.0) {
            pick(rng.gen_range(0..candidates.len()), SelectionReason::Unexplored)
        } else {
            pick(first_max(values), SelectionReason::Exploit)
        };
        debug!(state = %state, action = %selection.action, why = ?selection.why, "action selected");
        selection
    }
}

fn ensure_candidates(candidates: &[ActionId]) -> Result<()> {
    if candidates.is_empty() {
        return Err(PolicyError::InvalidInput("candidate actions must not be empty".to_string()));
    }
    Ok(())
}

/// Index of the first maximum. Values are finite by construction.
fn first_max(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn stable_seed(state: &StateKey, generation: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    state.as_str().hash(&mut hasher);
    generation.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn policy(epsilon: f64) -> QLearningPolicy {
        QLearningPolicy::new(
            Arc::new(KnowledgeStore::new()),
            PolicyConfig {
                epsilon,
                ..PolicyConfig::default()
            },
        )
    }

    fn actions(names: &[&str]) -> Vec<ActionId> {
        names.iter().map(|n| ActionId::from_raw(*n)).collect()
    }

    #[test]
    fn first_update_from_zero_is_exact() {
        let p = policy(0.1);
        let s = StateKey::from_raw("s");
        let a = ActionId::from_raw("a");
        let change = p.update(&s, &a, 10.0, &StateKey::from_raw("s2")).unwrap();
        assert_eq!(change.previous, 0.0);
        assert_eq!(change.value, 1.0);
        assert_eq!(p.store().get(&s, &a), 1.0);
    }

    #[test]
    fn update_discounts_successor_maximum() {
        let p = policy(0.0);
        let s = StateKey::from_raw("s");
        let next = StateKey::from_raw("next");
        p.store().set(&next, &ActionId::from_raw("x"), 10.0);
        let change = p.update(&s, &ActionId::from_raw("a"), 0.0, &next).unwrap();
        // 0 + 0.1 * (0 + 0.95 * 10 - 0)
        assert!((change.value - 0.95).abs() < 1e-12);
    }

    #[test]
    fn non_finite_reward_is_rejected_without_mutation() {
        let p = policy(0.0);
        let s = StateKey::from_raw("s");
        let err = p
            .update(&s, &ActionId::from_raw("a"), f64::NAN, &s)
            .expect_err("NaN reward must fail");
        assert!(matches!(err, PolicyError::InvalidInput(_)));
        assert_eq!(p.store().state_count(), 0);
    }

    #[test]
    fn empty_candidates_are_invalid() {
        let p = policy(0.1);
        let err = p.select_action(&StateKey::from_raw("s"), &[]).expect_err("must fail");
        assert!(matches!(err, PolicyError::InvalidInput(_)));
    }

    #[test]
    fn single_candidate_always_wins() {
        let p = policy(1.0);
        let only = actions(&["only"]);
        for _ in 0..50 {
            let sel = p.select_action(&StateKey::from_raw("s"), &only).unwrap();
            assert_eq!(sel.action, only[0]);
            assert_eq!(sel.why, SelectionReason::OnlyCandidate);
        }
    }

    #[test]
    fn exploit_picks_first_maximum() {
        let p = policy(0.0);
        let s = StateKey::from_raw("s");
        let cands = actions(&["a", "b", "c"]);
        p.store().set(&s, &cands[1], 2.0);
        p.store().set(&s, &cands[2], 2.0);
        let sel = p.select_action(&s, &cands).unwrap();
        assert_eq!(sel.index, 1);
        assert_eq!(sel.why, SelectionReason::Exploit);
        assert_eq!(sel.value, 2.0);
    }

    #[test]
    fn all_zero_values_are_explored_randomly() {
        let p = policy(0.0);
        let s = StateKey::from_raw("s");
        let cands = actions(&["a", "b", "c"]);
        let mut seen = [false; 3];
        for _ in 0..200 {
            let sel = p.select_action(&s, &cands).unwrap();
            assert_eq!(sel.why, SelectionReason::Unexplored);
            seen[sel.index] = true;
        }
        assert!(seen.iter().all(|s| *s), "every candidate should come up: {seen:?}");
    }

    #[test]
    fn epsilon_one_always_explores() {
        let p = policy(1.0);
        let s = StateKey::from_raw("s");
        let cands = actions(&["a", "b"]);
        p.store().set(&s, &cands[0], 5.0);
        // StepRng(0, 0) yields 0.0 for every float draw, below any positive epsilon.
        let sel = p
            .select_action_with(&mut StepRng::new(0, 0), &s, &cands)
            .unwrap();
        assert_eq!(sel.why, SelectionReason::Explore);
    }

    #[test]
    fn stable_selection_repeats_until_a_write() {
        let p = policy(0.5);
        let s = StateKey::from_raw("s");
        let cands = actions(&["a", "b", "c", "d"]);
        let first = p.select_action_stable(&s, &cands).unwrap();
        for _ in 0..20 {
            assert_eq!(p.select_action_stable(&s, &cands).unwrap(), first);
        }
    }

    #[test]
    fn config_is_sanitized() {
        let cfg = PolicyConfig {
            epsilon: 3.0,
            learning_rate: f64::NAN,
            discount_factor: -1.0,
        }
        .sanitized();
        assert_eq!(cfg.epsilon, 1.0);
        assert_eq!(cfg.learning_rate, DEFAULT_LEARNING_RATE);
        assert_eq!(cfg.discount_factor, 0.0);
    }

    #[derive(Debug)]
    struct Doubling;

    impl ValueUpdate for Doubling {
        fn next_value(&self, current: f64, reward: f64, _next_max: f64) -> f64 {
            current * 2.0 + reward
        }
    }

    #[test]
    fn update_rule_can_be_swapped() {
        let p = policy(0.0).with_rule(Doubling);
        let s = StateKey::from_raw("s");
        let a = ActionId::from_raw("a");
        p.update(&s, &a, 1.0, &s).unwrap();
        let change = p.update(&s, &a, 1.0, &s).unwrap();
        assert_eq!(change.value, 3.0);
    }
}
