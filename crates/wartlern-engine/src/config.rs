//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! is a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use wartlern_core::KeywordScorer;
use wartlern_policy::{PersistConfig, PolicyConfig};

use crate::error::{EngineError, Result};
use crate::training::TrainingConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: PolicyConfig,
    pub persistence: PersistConfig,
    pub training: TrainingConfig,
    pub keywords: KeywordScorer,
}

impl EngineConfig {
    /// Reads a JSON configuration file. A missing file yields defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&content)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.policy = config.policy.sanitized();
        config.training = config.training.sanitized();
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let cfg = EngineConfig::from_json("{}").expect("empty config should parse");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.policy.epsilon, 0.1);
        assert_eq!(cfg.policy.discount_factor, 0.95);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = EngineConfig::from_json(
            r#"{"policy": {"epsilon": 1.7}, "persistence": {"key": "custom"}}"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.policy.epsilon, 1.0);
        assert_eq!(cfg.policy.learning_rate, 0.1);
        assert_eq!(cfg.persistence.key, "custom");
        assert_eq!(cfg.persistence.timeout_ms, 2_000);
    }

    #[test]
    fn unusable_training_rate_falls_back_to_default() {
        let cfg = EngineConfig::from_json(r#"{"training": {"learning_rate": -0.5, "seed": 7}}"#)
            .expect("training section should parse");
        assert_eq!(cfg.training.learning_rate, 0.1);
        assert_eq!(cfg.training.seed, 7);

        let cfg = EngineConfig::from_json(r#"{"training": {"learning_rate": 0.0}}"#)
            .expect("training section should parse");
        assert_eq!(cfg.training.learning_rate, 0.1);

        let cfg = EngineConfig::from_json(r#"{"training": {"learning_rate": 0.05}}"#)
            .expect("training section should parse");
        assert_eq!(cfg.training.learning_rate, 0.05);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = EngineConfig::from_json("{policy").expect_err("must fail");
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = EngineConfig::from_path(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(cfg, EngineConfig::default());
    }
}
