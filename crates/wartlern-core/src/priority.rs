//! Priority levels and the keyword-weight lexical scorer.
//!
//! The [`KeywordScorer`] is the deterministic baseline every priority decision
//! starts from. It knows nothing about past outcomes; learned adjustments live
//! in the policy crate and only take over once experience exists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::state::ActionId;

/// Threshold on the HIGH table score at or above which a text is HIGH.
pub const THRESHOLD_HIGH: u32 = 30;
/// Threshold on the MEDIUM table score at or above which a text is MEDIUM.
pub const THRESHOLD_MEDIUM: u32 = 20;

/// Closed set of priority levels a work item can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// All levels in ascending order. This is the fixed priority action space.
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }

    /// Numeric tier used inside state keys.
    #[must_use]
    pub fn tier(self) -> u32 {
        match self {
            Priority::Low => 10,
            Priority::Medium => 50,
            Priority::High => 100,
        }
    }

    #[must_use]
    pub fn action_id(self) -> ActionId {
        ActionId::priority(self)
    }

    /// Inverse of [`Priority::action_id`].
    #[must_use]
    pub fn from_action(action: &ActionId) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.action_id() == *action)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown priority label: {0:?}")]
pub struct ParsePriorityError(pub String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    /// Accepts English and Spanish labels in any case as well as the numeric tiers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "baja" | "10" => Ok(Priority::Low),
            "medium" | "media" | "medi" | "50" => Ok(Priority::Medium),
            "high" | "alta" | "100" => Ok(Priority::High),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// Capability for anything that maps free text to a priority.
///
/// The keyword scorer is the default implementation; a faster or smarter
/// backend can be swapped in behind this trait without touching callers.
pub trait PriorityClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, text: &str) -> Priority;
}

/// A keyword and the weight it contributes when found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedKeyword {
    pub keyword: String,
    pub weight: u32,
}

impl WeightedKeyword {
    fn new(keyword: &str, weight: u32) -> Self {
        Self {
            keyword: keyword.to_string(),
            weight,
        }
    }
}

/// Raw scores accumulated from both keyword tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeywordScore {
    pub high: u32,
    pub medium: u32,
}

/// Substring keyword scorer with separate HIGH and MEDIUM weight tables.
///
/// Both tables are evaluated independently, so a text can score on both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordScorer {
    pub high: Vec<WeightedKeyword>,
    pub medium: Vec<WeightedKeyword>,
    pub threshold_high: u32,
    pub threshold_medium: u32,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self {
            high: vec![
                WeightedKeyword::new("urgente", 50),
                WeightedKeyword::new("critico", 40),
                WeightedKeyword::new("fuego", 50),
                WeightedKeyword::new("falla", 30),
                WeightedKeyword::new("inmediato", 40),
                WeightedKeyword::new("peligro", 40),
                WeightedKeyword::new("roto", 30),
                WeightedKeyword::new("detenido", 40),
            ],
            medium: vec![
                WeightedKeyword::new("revisar", 10),
                WeightedKeyword::new("mantenimiento", 10),
                WeightedKeyword::new("ruido", 20),
                WeightedKeyword::new("ajuste", 10),
                WeightedKeyword::new("fuga", 20),
                WeightedKeyword::new("desgaste", 10),
            ],
            threshold_high: THRESHOLD_HIGH,
            threshold_medium: THRESHOLD_MEDIUM,
        }
    }
}

impl KeywordScorer {
    /// Accumulates the weights of every keyword occurring in `text`.
    #[must_use]
    pub fn score(&self, text: &str) -> KeywordScore {
        let lowered = text.to_lowercase();
        let sum = |table: &[WeightedKeyword]| {
            table
                .iter()
                .filter(|k| !k.keyword.is_empty() && lowered.contains(&k.keyword.to_lowercase()))
                .fold(0u32, |acc, k| acc.saturating_add(k.weight))
        };
        KeywordScore {
            high: sum(&self.high),
            medium: sum(&self.medium),
        }
    }

    /// Classifies `text`. Empty text is MEDIUM, not LOW.
    #[must_use]
    pub fn classify_priority(&self, text: &str) -> Priority {
        if text.is_empty() {
            return Priority::Medium;
        }
        let score = self.score(text);
        if score.high >= self.threshold_high {
            Priority::High
        } else if score.high > 0 || score.medium >= self.threshold_medium {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

impl PriorityClassifier for KeywordScorer {
    fn classify(&self, text: &str) -> Priority {
        self.classify_priority(text)
    }
}

/// Classifies with the default keyword tables.
#[must_use]
pub fn classify_priority(text: &str) -> Priority {
    KeywordScorer::default().classify_priority(text)
}
