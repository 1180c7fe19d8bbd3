//! Background training of the priority classifier.
//!
//! A [`TrainingCoordinator`] owns at most one session at a time. The session
//! runs on its own task; callers only ever read a snapshot of its progress.
//!
//! ```text
//! idle -> running -> completed | error
//!         running -> stopping -> idle
//! ```

pub mod model;
pub mod pipeline;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
pub use model::{SoftmaxRegression, TrainedModel};
use pipeline::{Sample, Split, Standardizer, CLASSES, FEATURES};

/// Smallest accepted sample count; ten rows per class.
pub const MIN_SAMPLES: usize = 30;
pub const MAX_SAMPLES: usize = 200_000;
/// Oldest log lines are dropped beyond this.
const MAX_LOG_LINES: usize = 500;
const FALLBACK_TIMESTAMP: &str = "1970-01-01T00:00:00Z";
const FALLBACK_CLOCK: &str = "--:--:--";

/// Training-loop tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Pause after every epoch, so progress stays observable.
    pub epoch_delay_ms: u64,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epoch_delay_ms: 500,
            learning_rate: 0.1,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Replaces a learning rate that is not a finite positive number with the default.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let learning_rate = if self.learning_rate.is_finite() && self.learning_rate > 0.0 {
            self.learning_rate
        } else {
            warn!(learning_rate = self.learning_rate, "invalid learning rate, using the default");
            Self::default().learning_rate
        };
        Self {
            learning_rate,
            ..self
        }
    }
}

/// Failures inside a running session. Captured into the session, never
/// returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainingError {
    #[error("Not enough data: {0}")]
    InsufficientData(String),
    #[error("Expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Training diverged (non-finite values)")]
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
    Stopping,
}

impl TrainingStatus {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, TrainingStatus::Running | TrainingStatus::Stopping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    DataSynthesis,
    DataCleaning,
    FeatureScaling,
    StratifiedSplit,
    Training,
    Validation,
    TestEvaluation,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::DataSynthesis,
        PipelineStage::DataCleaning,
        PipelineStage::FeatureScaling,
        PipelineStage::StratifiedSplit,
        PipelineStage::Training,
        PipelineStage::Validation,
        PipelineStage::TestEvaluation,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::DataSynthesis => "Raw data synthesis",
            PipelineStage::DataCleaning => "Data cleaning",
            PipelineStage::FeatureScaling => "Feature scaling",
            PipelineStage::StratifiedSplit => "Stratified split",
            PipelineStage::Training => "Training",
            PipelineStage::Validation => "Validation",
            PipelineStage::TestEvaluation => "Test evaluation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: PipelineStage,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: u32,
    pub loss: f64,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
}

/// Snapshot of a training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub status: TrainingStatus,
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub sample_count: usize,
    pub history: Vec<EpochMetrics>,
    pub logs: Vec<String>,
    pub stages: Vec<StageProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl Default for TrainingSession {
    fn default() -> Self {
        Self {
            status: TrainingStatus::Idle,
            current_epoch: 0,
            total_epochs: 0,
            sample_count: 0,
            history: Vec::new(),
            logs: Vec::new(),
            stages: pending_stages(),
            test_accuracy: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl TrainingSession {
    fn log(&mut self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", clock(), message.as_ref());
        debug!(target: "wartlern::training", "{line}");
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.remove(0);
        }
        self.logs.push(line);
    }

    fn mark(&mut self, stage: PipelineStage, status: StageStatus) {
        if let Some(progress) = self.stages.iter_mut().find(|p| p.stage == stage) {
            progress.status = status;
        }
    }

    #[must_use]
    pub fn stage(&self, stage: PipelineStage) -> Option<StageStatus> {
        self.stages.iter().find(|p| p.stage == stage).map(|p| p.status)
    }
}

fn pending_stages() -> Vec<StageProgress> {
    PipelineStage::ALL
        .iter()
        .map(|&stage| StageProgress {
            stage,
            status: StageStatus::Pending,
        })
        .collect()
}

fn clock() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| FALLBACK_CLOCK.to_string())
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| FALLBACK_TIMESTAMP.to_string())
}

/// Starts, stops and reports on classifier training sessions.
#[derive(Debug)]
pub struct TrainingCoordinator {
    config: TrainingConfig,
    session: Arc<watch::Sender<TrainingSession>>,
    cancel: Mutex<CancellationToken>,
    model: Arc<Mutex<Option<Arc<TrainedModel>>>>,
}

impl TrainingCoordinator {
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        let (session, _) = watch::channel(TrainingSession::default());
        Self {
            config: config.sanitized(),
            session: Arc::new(session),
            cancel: Mutex::new(CancellationToken::new()),
            model: Arc::new(Mutex::new(None)),
        }
    }

    /// Launches a session on a new task. Must be called within a Tokio runtime.
    ///
    /// Rejected with [`EngineError::AlreadyRunning`] while a session is running
    /// or stopping; the active session is left untouched.
    pub fn start(&self, epochs: u32, sample_count: usize) -> Result<TrainingSession> {
        if epochs == 0 {
            return Err(EngineError::InvalidInput("epochs must be at least 1".to_string()));
        }
        if !(MIN_SAMPLES..=MAX_SAMPLES).contains(&sample_count) {
            return Err(EngineError::InvalidInput(format!(
                "sample_count must be between {MIN_SAMPLES} and {MAX_SAMPLES}, got {sample_count}"
            )));
        }

        let token = CancellationToken::new();
        let accepted = self.session.send_if_modified(|session| {
            if session.status.is_active() {
                return false;
            }
            *session = TrainingSession {
                status: TrainingStatus::Running,
                total_epochs: epochs,
                sample_count,
                started_at: Some(timestamp()),
                ..TrainingSession::default()
            };
            session.log(format!("Training started: {epochs} epochs, {sample_count} samples"));
            *self.cancel.lock() = token.clone();
            true
        });
        if !accepted {
            debug!("training start rejected, a session is active");
            return Err(EngineError::AlreadyRunning);
        }
        info!(epochs, sample_count, "training started");

        let learning_rate = self.config.learning_rate;
        let worker = tokio::spawn(run_session(
            self.config.clone(),
            move |classifier: &mut SoftmaxRegression, train: &[Sample]| {
                classifier.fit_epoch(train, learning_rate)
            },
            epochs,
            sample_count,
            Arc::clone(&self.session),
            Arc::clone(&self.model),
            token,
        ));
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(error = %e, "training task ended abnormally");
                session.send_modify(|s| {
                    s.status = TrainingStatus::Error;
                    s.error = Some(format!("training task ended abnormally: {e}"));
                    s.finished_at = Some(timestamp());
                    s.log("Training aborted");
                });
            }
        });

        Ok(self.status())
    }

    /// Requests the running session to stop at the next epoch boundary.
    /// Does not wait. A no-op unless a session is running.
    pub fn stop(&self) -> TrainingStatus {
        let mut status = TrainingStatus::Idle;
        self.session.send_if_modified(|session| {
            status = session.status;
            if session.status != TrainingStatus::Running {
                return false;
            }
            session.status = TrainingStatus::Stopping;
            session.log("Stop requested");
            self.cancel.lock().cancel();
            status = TrainingStatus::Stopping;
            true
        });
        if status == TrainingStatus::Stopping {
            info!("training stop requested");
        }
        status
    }

    #[must_use]
    pub fn status(&self) -> TrainingSession {
        self.session.borrow().clone()
    }

    /// Receiver that observes every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrainingSession> {
        self.session.subscribe()
    }

    /// The model of the last completed session.
    #[must_use]
    pub fn model(&self) -> Option<Arc<TrainedModel>> {
        self.model.lock().clone()
    }
}

impl Drop for TrainingCoordinator {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

/// Ends a session that observed cancellation.
fn finish_stopped(session: &watch::Sender<TrainingSession>) {
    session.send_modify(|s| {
        s.status = TrainingStatus::Idle;
        s.finished_at = Some(timestamp());
        s.log(format!("Training stopped after epoch {}", s.current_epoch));
    });
    info!("training stopped");
}

async fn run_session<F>(
    config: TrainingConfig,
    step: F,
    epochs: u32,
    sample_count: usize,
    session: Arc<watch::Sender<TrainingSession>>,
    model_slot: Arc<Mutex<Option<Arc<TrainedModel>>>>,
    cancel: CancellationToken,
) where
    F: FnMut(&mut SoftmaxRegression, &[Sample]) -> std::result::Result<f64, TrainingError>,
{
    match train(&config, step, epochs, sample_count, &session, &cancel).await {
        Ok(Some(model)) => {
            let test_accuracy = model.test_accuracy;
            *model_slot.lock() = Some(Arc::new(model));
            session.send_modify(|s| {
                s.finished_at = Some(timestamp());
                if s.status == TrainingStatus::Stopping {
                    s.status = TrainingStatus::Idle;
                    s.log("Training stopped after the final epoch");
                } else {
                    s.status = TrainingStatus::Completed;
                    s.log(format!("Training completed, test accuracy {test_accuracy:.3}"));
                }
            });
            info!(test_accuracy, "training completed");
        }
        Ok(None) => finish_stopped(&session),
        Err(e) => {
            error!(error = %e, "training failed");
            session.send_modify(|s| {
                s.status = TrainingStatus::Error;
                s.error = Some(e.to_string());
                s.finished_at = Some(timestamp());
                s.log(format!("Training failed: {e}"));
            });
        }
    }
}

/// Runs the pipeline, calling `step` for one pass over the training rows
/// per epoch. `Ok(None)` means the session was stopped.
async fn train<F>(
    config: &TrainingConfig,
    mut step: F,
    epochs: u32,
    sample_count: usize,
    session: &watch::Sender<TrainingSession>,
    cancel: &CancellationToken,
) -> std::result::Result<Option<TrainedModel>, TrainingError>
where
    F: FnMut(&mut SoftmaxRegression, &[Sample]) -> std::result::Result<f64, TrainingError>,
{
    let advance = |stage: PipelineStage, status: StageStatus, message: Option<String>| {
        session.send_modify(|s| {
            s.mark(stage, status);
            if let Some(m) = &message {
                s.log(format!("{}: {m}", stage.label()));
            }
        });
    };

    advance(PipelineStage::DataSynthesis, StageStatus::InProgress, None);
    let raw = pipeline::synthesize(sample_count, config.seed);
    advance(
        PipelineStage::DataSynthesis,
        StageStatus::Completed,
        Some(format!("Synthesized {} rows with {FEATURES} features", raw.len())),
    );

    advance(PipelineStage::DataCleaning, StageStatus::InProgress, None);
    let (mut rows, dropped) = pipeline::clean(raw);
    advance(
        PipelineStage::DataCleaning,
        StageStatus::Completed,
        Some(format!("Dropped {dropped} rows with missing values, {} left", rows.len())),
    );

    advance(PipelineStage::FeatureScaling, StageStatus::InProgress, None);
    let scaler = Standardizer::fit(&rows)?;
    scaler.transform_all(&mut rows);
    advance(
        PipelineStage::FeatureScaling,
        StageStatus::Completed,
        Some("Features standardized".to_string()),
    );

    advance(PipelineStage::StratifiedSplit, StageStatus::InProgress, None);
    let Split {
        train,
        validation,
        test,
    } = pipeline::stratified_split(rows, config.seed)?;
    advance(
        PipelineStage::StratifiedSplit,
        StageStatus::Completed,
        Some(format!(
            "Split: {} train, {} validation, {} test",
            train.len(),
            validation.len(),
            test.len()
        )),
    );

    advance(PipelineStage::Training, StageStatus::InProgress, None);
    advance(PipelineStage::Validation, StageStatus::InProgress, None);
    let mut classifier = SoftmaxRegression::new(FEATURES, CLASSES);
    let delay = Duration::from_millis(config.epoch_delay_ms);
    for epoch in 1..=epochs {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let loss = step(&mut classifier, &train)?;
        let metrics = EpochMetrics {
            epoch,
            loss,
            train_accuracy: classifier.accuracy(&train),
            validation_accuracy: classifier.accuracy(&validation),
        };
        session.send_modify(|s| {
            s.current_epoch = epoch;
            s.history.push(metrics);
            s.log(format!(
                "Epoch {epoch}/{epochs}: loss {:.4}, train {:.3}, validation {:.3}",
                metrics.loss, metrics.train_accuracy, metrics.validation_accuracy
            ));
        });
        debug!(epoch, loss, "training epoch finished");

        if epoch < epochs {
            tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
    advance(PipelineStage::Training, StageStatus::Completed, None);
    advance(PipelineStage::Validation, StageStatus::Completed, None);

    advance(PipelineStage::TestEvaluation, StageStatus::InProgress, None);
    let test_accuracy = evaluate(&classifier, &test);
    session.send_modify(|s| {
        s.test_accuracy = Some(test_accuracy);
        s.mark(PipelineStage::TestEvaluation, StageStatus::Completed);
    });
    if test_accuracy < 1.0 / 3.0 {
        warn!(test_accuracy, "trained classifier is no better than chance");
    }

    Ok(Some(TrainedModel {
        scaler,
        classifier,
        test_accuracy,
    }))
}

fn evaluate(classifier: &SoftmaxRegression, test: &[Sample]) -> f64 {
    classifier.accuracy(test)
}
