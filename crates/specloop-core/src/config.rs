//! Refinement configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `SPECLOOP_*` environment overrides. The merged result is validated before
//! any loop or coordinator sees it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::evaluator::Criterion;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Tunables for the refinement loop and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Composite score at or above which a session converges.
    pub convergence_threshold: f64,
    /// Highest round index a session may reach before it is exhausted.
    pub max_rounds: u32,
    /// Relative weight of each criterion. Criteria with weight 0 are not scored.
    pub criteria_weights: BTreeMap<Criterion, f64>,
    /// Tie-break order for feedback target selection.
    pub criteria_priority: Vec<Criterion>,
    /// Wall-clock limit for generate + evaluate in one round.
    pub per_round_timeout_ms: u64,
    /// Maximum number of sessions a batch runs at once.
    pub batch_concurrency_limit: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        let criteria_weights = BTreeMap::from([
            (Criterion::Completeness, 0.3),
            (Criterion::MaterialValidity, 0.3),
            (Criterion::DimensionalPlausibility, 0.2),
            (Criterion::StyleConsistency, 0.2),
        ]);
        Self {
            convergence_threshold: 0.85,
            max_rounds: 5,
            criteria_weights,
            criteria_priority: Criterion::ALL.to_vec(),
            per_round_timeout_ms: 30_000,
            batch_concurrency_limit: 4,
        }
    }
}

impl RefinementConfig {
    /// Load defaults, an optional TOML file and process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML; missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `SPECLOOP_*` overrides read through `lookup`.
    ///
    /// Weights use `name=value` pairs separated by commas and replace the
    /// whole weight table.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SPECLOOP_CONVERGENCE_THRESHOLD") {
            self.convergence_threshold = parse_env("SPECLOOP_CONVERGENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("SPECLOOP_MAX_ROUNDS") {
            self.max_rounds = parse_env("SPECLOOP_MAX_ROUNDS", &v)?;
        }
        if let Some(v) = lookup("SPECLOOP_PER_ROUND_TIMEOUT_MS") {
            self.per_round_timeout_ms = parse_env("SPECLOOP_PER_ROUND_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SPECLOOP_BATCH_CONCURRENCY_LIMIT") {
            self.batch_concurrency_limit = parse_env("SPECLOOP_BATCH_CONCURRENCY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SPECLOOP_CRITERIA_WEIGHTS") {
            self.criteria_weights = parse_weights(&v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.convergence_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return Err(invalid("convergence_threshold", "must be within [0, 1]"));
        }
        if self.max_rounds == 0 {
            return Err(invalid("max_rounds", "must be at least 1"));
        }
        if self.batch_concurrency_limit == 0 {
            return Err(invalid("batch_concurrency_limit", "must be at least 1"));
        }
        if self.per_round_timeout_ms == 0 {
            return Err(invalid("per_round_timeout_ms", "must be positive"));
        }
        for (criterion, weight) in &self.criteria_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid(
                    "criteria_weights",
                    &format!("weight for {criterion} must be finite and non-negative"),
                ));
            }
        }
        if self.criteria_weights.values().sum::<f64>() <= 0.0 {
            return Err(invalid("criteria_weights", "at least one weight must be positive"));
        }
        Ok(())
    }

    pub fn per_round_timeout(&self) -> Duration {
        Duration::from_millis(self.per_round_timeout_ms)
    }

    /// Weight for `criterion`, 0 when absent.
    pub fn weight(&self, criterion: Criterion) -> f64 {
        self.criteria_weights.get(&criterion).copied().unwrap_or(0.0)
    }

    /// Priority order with any unlisted criteria appended in declaration order.
    pub fn priority(&self) -> Vec<Criterion> {
        let mut order = Vec::with_capacity(Criterion::ALL.len());
        for c in self.criteria_priority.iter().chain(Criterion::ALL.iter()) {
            if !order.contains(c) {
                order.push(*c);
            }
        }
        order
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, &format!("cannot parse {value:?}")))
}

fn parse_weights(value: &str) -> Result<BTreeMap<Criterion, f64>, ConfigError> {
    let mut weights = BTreeMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, weight) = pair
            .split_once('=')
            .ok_or_else(|| invalid("SPECLOOP_CRITERIA_WEIGHTS", &format!("expected name=value, got {pair:?}")))?;
        let criterion: Criterion = name
            .trim()
            .parse()
            .map_err(|e: String| invalid("SPECLOOP_CRITERIA_WEIGHTS", &e))?;
        weights.insert(criterion, parse_env("SPECLOOP_CRITERIA_WEIGHTS", weight)?);
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = RefinementConfig::default();
        config.validate().unwrap();
        assert_eq!(config.convergence_threshold, 0.85);
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.per_round_timeout(), Duration::from_secs(30));
        let total: f64 = config.criteria_weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn toml_overrides_only_named_keys() {
        let config = RefinementConfig::from_toml(
            r#"
            max_rounds = 3

            [criteria_weights]
            completeness = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.convergence_threshold, 0.85);
        assert_eq!(config.criteria_weights.len(), 1);
        assert_eq!(config.weight(Criterion::Completeness), 1.0);
        assert_eq!(config.weight(Criterion::StyleConsistency), 0.0);
    }

    #[test]
    fn unknown_criterion_in_toml_is_rejected() {
        let err = RefinementConfig::from_toml("[criteria_weights]\nbeauty = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SPECLOOP_MAX_ROUNDS", "2"),
            ("SPECLOOP_CONVERGENCE_THRESHOLD", "0.9"),
            ("SPECLOOP_CRITERIA_WEIGHTS", "completeness=0.5, material_validity=0.5"),
        ]);
        let mut config = RefinementConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.convergence_threshold, 0.9);
        assert_eq!(config.criteria_weights.len(), 2);
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let mut config = RefinementConfig::default();
        let err = config
            .apply_env(|k| (k == "SPECLOOP_MAX_ROUNDS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SPECLOOP_MAX_ROUNDS"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = RefinementConfig {
            convergence_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.convergence_threshold = 0.8;
        config.batch_concurrency_limit = 0;
        assert!(config.validate().is_err());

        config.batch_concurrency_limit = 1;
        config.criteria_weights = BTreeMap::from([(Criterion::Completeness, -1.0)]);
        assert!(config.validate().is_err());

        config.criteria_weights = BTreeMap::from([(Criterion::Completeness, 0.0)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_rounds_is_rejected_from_every_source() {
        let config = RefinementConfig {
            max_rounds: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_rounds"));

        let from_toml = RefinementConfig::from_toml("max_rounds = 0").unwrap();
        assert!(from_toml.validate().is_err());

        let mut from_env = RefinementConfig::default();
        from_env
            .apply_env(|k| (k == "SPECLOOP_MAX_ROUNDS").then(|| "0".to_string()))
            .unwrap();
        assert!(from_env.validate().is_err());

        let one = RefinementConfig {
            max_rounds: 1,
            ..Default::default()
        };
        one.validate().unwrap();
    }

    #[test]
    fn priority_appends_missing_criteria() {
        let config = RefinementConfig {
            criteria_priority: vec![Criterion::StyleConsistency],
            ..Default::default()
        };
        let order = config.priority();
        assert_eq!(order[0], Criterion::StyleConsistency);
        assert_eq!(order.len(), Criterion::ALL.len());
    }
}
