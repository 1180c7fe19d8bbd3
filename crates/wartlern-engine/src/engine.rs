//! The decision facade.
//!
//! [`DecisionEngine`] ties the lexical classifier, the state encoder and the
//! Q-learning policy together. Decisions only read the knowledge store;
//! learning writes it and hands persistence to the background [`Persister`].
//!
//! Lock order: metrics before the store. Learning and reset hold the metrics
//! lock for the whole mutation, so no caller ever sees knowledge and counters
//! out of step.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wartlern_core::{
    compute_reward, document_reward, encode, ActionId, OutcomeRecord, Priority, PriorityClassifier,
    StateKey, Technician, WorkContext, WorkItem,
};
use wartlern_policy::{
    KnowledgeStore, KvBackend, PersistStats, Persister, PolicyConfig, QLearningPolicy,
    SelectionReason,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};

/// Confidence reported when a technician is picked by static rating.
const RATING_FALLBACK_CONFIDENCE: f64 = 0.5;
/// Learned value that maps to full confidence.
const CONFIDENCE_SCALE: f64 = 100.0;

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Keyword classification of the text.
    Lexical,
    /// Learned values for the encoded state.
    Learned,
    /// Highest static technician rating.
    Rating,
}

/// A priority decision together with how it was reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityDecision {
    pub priority: Priority,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why: Option<SelectionReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicianDecision {
    pub technician: Technician,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub source: DecisionSource,
    pub state: StateKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why: Option<SelectionReason>,
}

/// What a single learning call changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningResult {
    pub state: StateKey,
    pub action: ActionId,
    pub reward: f64,
    pub previous_value: f64,
    pub new_value: f64,
    /// `new_value - previous_value`.
    pub improvement: f64,
    pub running_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicLearning {
    pub topic: String,
    pub state: StateKey,
    pub documents_learned: usize,
    pub documents_skipped: usize,
    pub total_reward: f64,
    /// Learned value of the topic after all documents.
    pub value: f64,
    pub web_learning_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub states_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatistics {
    pub total_states: usize,
    pub total_actions: usize,
    pub metrics: MetricsSnapshot,
    pub policy: PolicyConfig,
    pub persistence: PersistStats,
}

/// Adaptive decision engine. Construct with [`DecisionEngine::open`], share
/// behind an `Arc`, and call [`DecisionEngine::shutdown`] before exit.
#[derive(Debug)]
pub struct DecisionEngine {
    classifier: Arc<dyn PriorityClassifier>,
    policy: QLearningPolicy,
    persister: Persister,
    metrics: Mutex<Metrics>,
}

impl DecisionEngine {
    /// Loads knowledge from `backend` and starts the background writer.
    ///
    /// Fails with [`EngineError::PersistenceUnavailable`] when stored knowledge
    /// exists but cannot be read, rather than silently starting empty.
    pub async fn open(config: &EngineConfig, backend: Arc<dyn KvBackend>) -> Result<Self> {
        let persistence = &config.persistence;
        let store =
            Arc::new(KnowledgeStore::load(backend.as_ref(), &persistence.key, persistence.timeout()).await?);
        let persister = Persister::spawn(Arc::clone(&store), backend, persistence.clone());
        let policy = QLearningPolicy::new(store, config.policy);
        info!(
            states = policy.store().state_count(),
            epsilon = policy.config().epsilon,
            "decision engine ready"
        );
        Ok(Self {
            classifier: Arc::new(config.keywords.clone()),
            policy,
            persister,
            metrics: Mutex::new(Metrics::default()),
        })
    }

    /// Replaces the lexical classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn PriorityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        self.policy.store()
    }

    /// Priority for `text`, learned when the context has priority knowledge.
    #[must_use]
    pub fn decide_priority(&self, text: &str, context: Option<&WorkContext>) -> Priority {
        self.priority_decision(text, context).priority
    }

    /// Like [`decide_priority`](Self::decide_priority), with provenance.
    ///
    /// Repeating the call without a learning update in between returns the
    /// same decision.
    #[must_use]
    pub fn priority_decision(&self, text: &str, context: Option<&WorkContext>) -> PriorityDecision {
        let lexical = |state: Option<StateKey>| PriorityDecision {
            priority: self.classifier.classify(text),
            source: DecisionSource::Lexical,
            state,
            why: None,
        };

        let Some(context) = context else {
            return lexical(None);
        };
        let state = encode(context);
        let actions = priority_actions();
        if self.store().lookup(&state, &actions).known() == 0 {
            debug!(state = %state, "no priority knowledge, using keywords");
            return lexical(Some(state));
        }

        match self.policy.select_action_stable(&state, &actions) {
            Ok(selection) => match Priority::from_action(&selection.action) {
                Some(priority) => PriorityDecision {
                    priority,
                    source: DecisionSource::Learned,
                    state: Some(state),
                    why: Some(selection.why),
                },
                None => lexical(Some(state)),
            },
            Err(e) => {
                warn!(error = %e, "priority selection failed, using keywords");
                lexical(Some(state))
            }
        }
    }

    /// Picks a technician for `work` among `candidates`.
    pub fn decide_technician(&self, work: &WorkItem, candidates: &[Technician]) -> Result<TechnicianDecision> {
        if candidates.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one candidate technician is required".to_string(),
            ));
        }
        let state = encode(&work.context());
        let actions: Vec<ActionId> = candidates.iter().map(|t| ActionId::technician(&t.id)).collect();

        if self.store().lookup(&state, &actions).known() == 0 {
            let best = best_rated(candidates);
            debug!(state = %state, technician = %candidates[best].id, "no experience, using rating");
            return Ok(TechnicianDecision {
                technician: candidates[best].clone(),
                confidence: RATING_FALLBACK_CONFIDENCE,
                source: DecisionSource::Rating,
                state,
                why: None,
            });
        }

        let selection = self.policy.select_action(&state, &actions)?;
        Ok(TechnicianDecision {
            technician: candidates[selection.index].clone(),
            confidence: (selection.value / CONFIDENCE_SCALE).clamp(0.0, 1.0),
            source: DecisionSource::Learned,
            state,
            why: Some(selection.why),
        })
    }

    /// Learns from the outcome of `work`, crediting its assigned technician.
    pub fn learn_from_outcome(&self, work: &WorkItem, outcome: &OutcomeRecord) -> Result<LearningResult> {
        let technician = work
            .assigned_technician
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("work item {} has no assigned technician", work.id))
            })?;
        let result = self.learn(
            encode(&work.context()),
            ActionId::technician(technician),
            outcome,
        )?;
        info!(
            work = %work.id,
            technician,
            reward = result.reward,
            value = result.new_value,
            "learned from outcome"
        );
        Ok(result)
    }

    /// Reinforces `priority` for `context` with the reward of `outcome`.
    pub fn learn_priority(
        &self,
        context: &WorkContext,
        priority: Priority,
        outcome: &OutcomeRecord,
    ) -> Result<LearningResult> {
        let result = self.learn(encode(context), priority.action_id(), outcome)?;
        info!(
            state = %result.state,
            priority = %priority,
            reward = result.reward,
            "learned priority outcome"
        );
        Ok(result)
    }

    /// Learns from text gathered about `topic`, one update per non-blank document.
    pub fn learn_from_documents(&self, topic: &str, documents: &[String]) -> Result<TopicLearning> {
        if topic.trim().is_empty() {
            return Err(EngineError::InvalidInput("topic must not be empty".to_string()));
        }
        let state = StateKey::topic(topic);
        let action = ActionId::knowledge_extraction();

        let mut metrics = self.metrics.lock();
        let mut learned = 0;
        let mut total_reward = 0.0;
        for document in documents.iter().filter(|d| !d.trim().is_empty()) {
            let reward = document_reward(document.chars().count());
            self.policy.update(&state, &action, reward, &state)?;
            learned += 1;
            total_reward += reward;
        }
        metrics.web_learning_events += learned as u64;
        let events = metrics.web_learning_events;
        drop(metrics);

        if learned > 0 {
            self.persister.request_flush();
        }
        let summary = TopicLearning {
            topic: topic.to_string(),
            value: self.store().get(&state, &action),
            state,
            documents_learned: learned,
            documents_skipped: documents.len() - learned,
            total_reward,
            web_learning_events: events,
        };
        info!(
            state = %summary.state,
            learned,
            skipped = summary.documents_skipped,
            "learned from documents"
        );
        Ok(summary)
    }

    /// Clears all knowledge and metrics together.
    pub fn reset_knowledge(&self) -> ResetSummary {
        let mut metrics = self.metrics.lock();
        let states_removed = self.store().reset();
        *metrics = Metrics::default();
        drop(metrics);
        self.persister.request_flush();
        info!(states_removed, "knowledge reset");
        ResetSummary { states_removed }
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    #[must_use]
    pub fn statistics(&self) -> EngineStatistics {
        let metrics = self.metrics();
        EngineStatistics {
            total_states: self.store().state_count(),
            total_actions: self.store().action_count(),
            metrics,
            policy: self.policy.config(),
            persistence: self.persister.stats(),
        }
    }

    /// Waits (bounded) until every learned update is persisted.
    pub async fn flush(&self) -> Result<()> {
        Ok(self.persister.flush().await?)
    }

    /// Flushes pending knowledge and stops the background writer.
    pub async fn shutdown(&self) -> Result<()> {
        let flushed = self.persister.shutdown().await;
        match &flushed {
            Ok(()) => info!("decision engine stopped"),
            Err(e) => warn!(error = %e, "decision engine stopped with unpersisted knowledge"),
        }
        Ok(flushed?)
    }

    fn learn(&self, state: StateKey, action: ActionId, outcome: &OutcomeRecord) -> Result<LearningResult> {
        let reward = compute_reward(outcome);
        let next_state = state.completed();

        let mut metrics = self.metrics.lock();
        let change = self.policy.update(&state, &action, reward, &next_state)?;
        metrics.record_outcome(outcome.was_successful, reward);
        let running_accuracy = metrics.accuracy();
        drop(metrics);

        self.persister.request_flush();
        Ok(LearningResult {
            state,
            action,
            reward,
            previous_value: change.previous,
            new_value: change.value,
            improvement: change.value - change.previous,
            running_accuracy,
        })
    }
}

fn priority_actions() -> Vec<ActionId> {
    Priority::ALL.iter().map(|p| p.action_id()).collect()
}

/// Index of the first highest rating. NaN ratings never win.
fn best_rated(candidates: &[Technician]) -> usize {
    let mut best = 0;
    for (i, t) in candidates.iter().enumerate().skip(1) {
        if t.rating > candidates[best].rating || candidates[best].rating.is_nan() {
            best = i;
        }
    }
    best
}
