//! Records supplied by the surrounding maintenance platform.
//!
//! These mirror what the platform's work-order and technician tables provide.
//! The engine never persists them; it only reads the fields it needs to build
//! state keys and candidate lists. Identifiers arrive as JSON strings or
//! integers depending on the caller, so they are normalized to strings here.

use serde::{Deserialize, Deserializer, Serialize};

use crate::priority::Priority;
use crate::state::WorkContext;

/// A maintenance work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Equipment category, e.g. "ELEC" or "HIDR".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub work_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Technician the work was assigned to; required to learn from its outcome.
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_technician: Option<String>,
}

impl WorkItem {
    /// The situational context used for state encoding.
    #[must_use]
    pub fn context(&self) -> WorkContext {
        WorkContext {
            category: self.category.clone(),
            work_type: self.work_type.clone(),
            priority: self.priority,
        }
    }
}

/// A technician that can be assigned to work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technician {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    /// Static quality rating used when there is no learned experience.
    #[serde(default)]
    pub rating: f64,
}

/// Observed result of a completed piece of work.
///
/// Missing fields fall back to values that earn neither time nor cost bonus:
/// a very slow resolution and an on-budget cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub was_successful: bool,
    #[serde(default = "default_resolution_days")]
    pub resolution_days: i64,
    #[serde(default = "default_cost")]
    pub expected_cost: f64,
    #[serde(default = "default_cost")]
    pub actual_cost: f64,
}

fn default_resolution_days() -> i64 {
    999
}

fn default_cost() -> f64 {
    1000.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Integer(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Integer(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn work_item_accepts_numeric_ids() {
        let item: WorkItem = serde_json::from_value(json!({
            "id": 123,
            "category": "ELEC",
            "type": "correctivo",
            "priority": "HIGH",
            "assigned_technician": 7
        }))
        .expect("Deserialization failed");

        assert_eq!(item.id, "123");
        assert_eq!(item.assigned_technician.as_deref(), Some("7"));
        assert_eq!(item.context().priority, Some(Priority::High));
    }

    #[test]
    fn outcome_defaults_are_neutral() {
        let outcome: OutcomeRecord =
            serde_json::from_value(json!({"was_successful": true})).expect("Deserialization failed");
        assert_eq!(outcome.resolution_days, 999);
        assert!((outcome.expected_cost - 1000.0).abs() < f64::EPSILON);
        assert!((outcome.actual_cost - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn technician_roundtrip_keeps_string_id() {
        let tech = Technician {
            id: "t-1".into(),
            name: Some("Ana".into()),
            specialty: Some("ELEC".into()),
            rating: 4.5,
        };
        let json = serde_json::to_string(&tech).expect("Serialization failed");
        assert!(json.contains("\"id\":\"t-1\""));
        let back: Technician = serde_json::from_str(&json).expect("Deserialization failed");
        assert_eq!(back, tech);
    }
}
