//! The knowledge store: learned values per state and action.
//!
//! A single coarse reader-writer lock guards the whole table. Reads vastly
//! outnumber writes, and every write is a tiny read-modify-write, so
//! partitioning the lock per state would buy nothing measurable.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use wartlern_core::{ActionId, StateKey};

use crate::error::{PolicyError, Result};
use crate::persist::KvBackend;

/// Version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

type ActionValues = HashMap<ActionId, f64>;

/// Serializable copy of the whole table. Ordered maps keep the output stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeSnapshot {
    pub version: u32,
    pub states: BTreeMap<StateKey, BTreeMap<ActionId, f64>>,
}

impl Default for KnowledgeSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            states: BTreeMap::new(),
        }
    }
}

impl KnowledgeSnapshot {
    /// Parses a stored snapshot. Accepts the versioned format as well as a
    /// bare `{state: {action: value}}` map. Other versions are rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Stored {
            Versioned(KnowledgeSnapshot),
            Bare(BTreeMap<StateKey, BTreeMap<ActionId, f64>>),
        }

        match serde_json::from_slice::<Stored>(bytes) {
            Ok(Stored::Versioned(snapshot)) if snapshot.version == SNAPSHOT_VERSION => Ok(snapshot),
            Ok(Stored::Versioned(snapshot)) => Err(PolicyError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            }),
            Ok(Stored::Bare(states)) => Ok(Self {
                version: SNAPSHOT_VERSION,
                states,
            }),
            // Re-parse strictly so the caller gets the real syntax/type error
            // instead of the untagged "did not match any variant".
            Err(_) => Ok(serde_json::from_slice::<KnowledgeSnapshot>(bytes)?),
        }
    }
}

/// Values read for a list of actions, plus the write generation they were read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// `None` where the pair has never been written.
    pub values: Vec<Option<f64>>,
    pub generation: u64,
}

impl Lookup {
    /// Values with absent entries read as 0.0.
    #[must_use]
    pub fn values_or_zero(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.unwrap_or(0.0)).collect()
    }

    /// Number of actions that have a stored value.
    #[must_use]
    pub fn known(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Before/after values of a single update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueChange {
    pub previous: f64,
    pub value: f64,
}

/// Mapping StateKey -> (ActionId -> value). Absent pairs read as 0.0.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    table: RwLock<HashMap<StateKey, ActionValues>>,
    /// Bumped under the write lock on every mutation.
    generation: AtomicU64,
}

impl KnowledgeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snapshot(snapshot: KnowledgeSnapshot) -> Self {
        Self {
            table: RwLock::new(into_table(snapshot)),
            generation: AtomicU64::new(0),
        }
    }

    /// Loads the store from `backend`, or starts empty when nothing is stored.
    pub async fn load(backend: &dyn KvBackend, key: &str, timeout: Duration) -> Result<Self> {
        let stored = tokio::time::timeout(timeout, backend.get(key))
            .await
            .map_err(|_| {
                PolicyError::PersistenceUnavailable(format!("load of {key:?} timed out after {timeout:?}"))
            })??;

        match stored {
            Some(bytes) => {
                let snapshot = KnowledgeSnapshot::from_slice(&bytes)?;
                let store = Self::from_snapshot(snapshot);
                info!(
                    key,
                    states = store.state_count(),
                    actions = store.action_count(),
                    "knowledge loaded"
                );
                Ok(store)
            }
            None => {
                info!(key, "no stored knowledge, starting empty");
                Ok(Self::new())
            }
        }
    }

    /// Writes the current table to `backend` and returns the generation written.
    pub async fn save(&self, backend: &dyn KvBackend, key: &str, ttl: Option<Duration>) -> Result<u64> {
        let (generation, bytes) = self.encode()?;
        backend.set(key, bytes, ttl).await?;
        debug!(key, generation, "knowledge saved");
        Ok(generation)
    }

    /// Serializes the table together with the generation it reflects.
    pub fn encode(&self) -> Result<(u64, Vec<u8>)> {
        let table = self.table.read();
        let generation = self.generation.load(Ordering::Acquire);
        let bytes = serde_json::to_vec(&snapshot_of(&table))?;
        Ok((generation, bytes))
    }

    #[must_use]
    pub fn get(&self, state: &StateKey, action: &ActionId) -> f64 {
        self.table
            .read()
            .get(state)
            .and_then(|actions| actions.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&self, state: &StateKey, action: &ActionId, value: f64) {
        let mut table = self.table.write();
        table
            .entry(state.clone())
            .or_default()
            .insert(action.clone(), value);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Highest value stored for `state`; 0.0 when the state is unseen or empty.
    #[must_use]
    pub fn max_value(&self, state: &StateKey) -> f64 {
        self.table.read().get(state).map_or(0.0, max_of)
    }

    /// Reads several actions of one state under a single lock acquisition.
    #[must_use]
    pub fn lookup(&self, state: &StateKey, actions: &[ActionId]) -> Lookup {
        let table = self.table.read();
        let generation = self.generation.load(Ordering::Acquire);
        let row = table.get(state);
        Lookup {
            values: actions
                .iter()
                .map(|a| row.and_then(|r| r.get(a)).copied())
                .collect(),
            generation,
        }
    }

    /// Atomically replaces the value of `(state, action)` with
    /// `next(current, max_value(next_state))`.
    pub fn apply(
        &self,
        state: &StateKey,
        action: &ActionId,
        next_state: &StateKey,
        next: impl FnOnce(f64, f64) -> f64,
    ) -> ValueChange {
        let mut table = self.table.write();
        let next_max = table.get(next_state).map_or(0.0, max_of);
        let slot = table
            .entry(state.clone())
            .or_default()
            .entry(action.clone())
            .or_insert(0.0);
        let previous = *slot;
        *slot = next(previous, next_max);
        let change = ValueChange {
            previous,
            value: *slot,
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        change
    }

    /// Drops everything and returns how many states were removed.
    pub fn reset(&self) -> usize {
        let mut table = self.table.write();
        let removed = table.len();
        table.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        removed
    }

    /// Replaces the whole table with `snapshot`.
    pub fn restore(&self, snapshot: KnowledgeSnapshot) {
        let mut table = self.table.write();
        *table = into_table(snapshot);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn snapshot(&self) -> KnowledgeSnapshot {
        snapshot_of(&self.table.read())
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.table.read().len()
    }

    #[must_use]
    pub fn action_count(&self) -> usize {
        self.table.read().values().map(HashMap::len).sum()
    }

    /// Monotonic counter of mutations since construction.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

fn max_of(actions: &ActionValues) -> f64 {
    actions
        .values()
        .copied()
        .reduce(f64::max)
        .unwrap_or(0.0)
}

fn snapshot_of(table: &HashMap<StateKey, ActionValues>) -> KnowledgeSnapshot {
    KnowledgeSnapshot {
        version: SNAPSHOT_VERSION,
        states: table
            .iter()
            .map(|(state, actions)| {
                (
                    state.clone(),
                    actions.iter().map(|(a, v)| (a.clone(), *v)).collect(),
                )
            })
            .collect(),
    }
}

fn into_table(snapshot: KnowledgeSnapshot) -> HashMap<StateKey, ActionValues> {
    snapshot
        .states
        .into_iter()
        .map(|(state, actions)| (state, actions.into_iter().collect()))
        .collect()
}
