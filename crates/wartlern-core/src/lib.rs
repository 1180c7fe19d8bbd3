//! Core types and pure functions of the wartlern decision engine.
//!
//! Everything in this crate is deterministic and free of I/O: priority
//! scoring, state encoding and reward shaping. Learning and persistence live
//! in `wartlern-policy`; orchestration lives in `wartlern-engine`.

pub mod priority;
pub mod reward;
pub mod state;
pub mod work;

pub use priority::{
    classify_priority, KeywordScore, KeywordScorer, ParsePriorityError, Priority,
    PriorityClassifier, WeightedKeyword,
};
pub use reward::{compute_reward, document_reward, RewardBreakdown};
pub use state::{encode, ActionId, StateKey, WorkContext};
pub use work::{OutcomeRecord, Technician, WorkItem};
