#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Decision facade and classifier training for wartlern.
//!
//! [`DecisionEngine`] answers "which priority" and "which technician" and
//! learns from reported outcomes. [`TrainingCoordinator`] runs the separate,
//! cancellable classifier training loop. Neither is a global: construct them
//! once, share them, and shut the engine down to flush its knowledge.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod training;

pub use config::EngineConfig;
pub use engine::{
    DecisionEngine, DecisionSource, EngineStatistics, LearningResult, PriorityDecision, ResetSummary,
    TechnicianDecision, TopicLearning,
};
pub use error::{EngineError, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use training::{
    PipelineStage, StageStatus, TrainedModel, TrainingConfig, TrainingCoordinator, TrainingError,
    TrainingSession, TrainingStatus,
};
