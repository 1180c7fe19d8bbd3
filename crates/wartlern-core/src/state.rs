//! State keys, action identifiers and the state encoder.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::priority::Priority;

/// Sentinel for a missing category or work type.
pub const UNKNOWN: &str = "unknown";
/// Maximum number of topic characters kept in a topic state key.
pub const TOPIC_KEY_MAX_CHARS: usize = 30;

const TOPIC_PREFIX: &str = "topic_";
const COMPLETED_SUFFIX: &str = "_completed";

/// Canonical encoding of a decision context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    /// Wraps an already-encoded key, e.g. one read back from a snapshot.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key for knowledge learned from external text about `topic`.
    #[must_use]
    pub fn topic(topic: &str) -> Self {
        let normalized: String = topic
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .take(TOPIC_KEY_MAX_CHARS)
            .collect();
        Self(format!("{TOPIC_PREFIX}{normalized}"))
    }

    /// The state a work item moves to once its outcome is known.
    #[must_use]
    pub fn completed(&self) -> Self {
        Self(format!("{}{COMPLETED_SUFFIX}", self.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a candidate decision outcome.
///
/// Priority actions and technician actions carry different prefixes, so the
/// two domains can share a state without colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn priority(priority: Priority) -> Self {
        Self(format!("priority.{}", priority.as_str()))
    }

    #[must_use]
    pub fn technician(id: &str) -> Self {
        Self(format!("technician.{id}"))
    }

    /// The single action taken when learning from a document.
    #[must_use]
    pub fn knowledge_extraction() -> Self {
        Self("knowledge.extract".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The situational fields a state key is built from. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub work_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Encodes a context into its state key. Total: missing fields become sentinels.
#[must_use]
pub fn encode(context: &WorkContext) -> StateKey {
    let category = normalize_field(context.category.as_deref());
    let work_type = normalize_field(context.work_type.as_deref());
    let tier = context.priority.map_or(0, Priority::tier);
    StateKey(format!("cat_{category}_type_{work_type}_pri_{tier}"))
}

fn normalize_field(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.split_whitespace().collect::<Vec<_>>().join("_"),
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_sentinels() {
        let key = encode(&WorkContext::default());
        assert_eq!(key.as_str(), "cat_unknown_type_unknown_pri_0");
    }

    #[test]
    fn full_context_encodes_every_field() {
        let ctx = WorkContext {
            category: Some(" ELEC ".into()),
            work_type: Some("correctivo mayor".into()),
            priority: Some(Priority::High),
        };
        assert_eq!(encode(&ctx).as_str(), "cat_ELEC_type_correctivo_mayor_pri_100");
        assert_eq!(encode(&ctx), encode(&ctx.clone()));
    }

    #[test]
    fn topic_keys_are_truncated() {
        let key = StateKey::topic("industrial maintenance procedures for pumps");
        assert_eq!(key.as_str(), "topic_industrial_maintenance_procedu");
        assert_eq!(key.as_str().chars().count(), TOPIC_PREFIX.len() + TOPIC_KEY_MAX_CHARS);
    }

    #[test]
    fn action_namespaces_are_disjoint() {
        assert_ne!(ActionId::priority(Priority::High), ActionId::technician("HIGH"));
        assert_eq!(ActionId::technician("12").as_str(), "technician.12");
    }

    #[test]
    fn completed_state_differs_from_origin() {
        let key = encode(&WorkContext::default());
        assert_eq!(key.completed().as_str(), "cat_unknown_type_unknown_pri_0_completed");
    }

    #[test]
    fn context_accepts_type_alias() {
        let ctx: WorkContext =
            serde_json::from_str(r#"{"category":"HIDR","type":"preventivo","priority":"LOW"}"#)
                .expect("context should deserialize");
        assert_eq!(ctx.work_type.as_deref(), Some("preventivo"));
        assert_eq!(ctx.priority, Some(Priority::Low));
    }
}
