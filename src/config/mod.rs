//! Engine configuration.
//!
//! Values come from the environment (prefix `ENGINE_`), with a `.env`
//! file honored in development. Every field has a sensible default; only
//! the catalog and scenario paths are deployment-specific.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Path to the rule catalog JSON document.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Path to the scenario script JSON document.
    #[serde(default = "default_scenario_path")]
    pub scenario_path: String,

    /// Regeneration attempts after the first candidate fails validation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-call timeout for generation and classification, in seconds.
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,

    /// Minimum classifier confidence for a consent verdict to count.
    #[serde(default = "default_consent_threshold")]
    pub consent_threshold: f64,

    /// Per-turn affect decay rate.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,

    /// Character cap applied by trim repairs.
    #[serde(default = "default_trim_max_chars")]
    pub trim_max_chars: usize,

    /// Dialogue turns of history included in generation prompts.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Long-term facts retrieved per turn.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
}

fn default_catalog_path() -> String {
    "config/rules.json".to_string()
}

fn default_scenario_path() -> String {
    "config/scenario.json".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_service_timeout_secs() -> u64 {
    30
}

fn default_consent_threshold() -> f64 {
    0.6
}

fn default_decay_rate() -> f64 {
    0.1
}

fn default_trim_max_chars() -> usize {
    200
}

fn default_history_limit() -> usize {
    10
}

fn default_memory_limit() -> usize {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            scenario_path: default_scenario_path(),
            max_retries: default_max_retries(),
            service_timeout_secs: default_service_timeout_secs(),
            consent_threshold: default_consent_threshold(),
            decay_rate: default_decay_rate(),
            trim_max_chars: default_trim_max_chars(),
            history_limit: default_history_limit(),
            memory_limit: default_memory_limit(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the environment, honoring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("ENGINE"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.consent_threshold) {
            return Err(ConfigError::Invalid(format!(
                "consent_threshold must be in [0, 1], got {}",
                self.consent_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(ConfigError::Invalid(format!(
                "decay_rate must be in [0, 1], got {}",
                self.decay_rate
            )));
        }
        if self.service_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service_timeout_secs must be positive".to_string(),
            ));
        }
        if self.trim_max_chars == 0 {
            return Err(ConfigError::Invalid(
                "trim_max_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.consent_threshold, 0.6);
        assert_eq!(config.decay_rate, 0.1);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = EngineConfig {
            consent_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = EngineConfig {
            service_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
