//! Engine configuration
//!
//! Values come from built-in defaults, then an optional `reconciliation.toml`
//! (or any format the `config` crate understands), then environment variables
//! prefixed with `RECON__`, e.g. `RECON__MIN_SCORE=60` or
//! `RECON__EXPLANATION__API_KEY=...`.

use config::{Config as Cfg, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::*;
use crate::utils::validation::validate_min_score;

/// Default file stem searched by [`EngineConfig::load`]
pub const DEFAULT_CONFIG_FILE: &str = "reconciliation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pairs scoring below this are never proposed
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub explanation: ExplanationConfig,
}

/// Tuning of the continuous tails of the amount and date sub-scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Relative amount difference at which the amount sub-score reaches 0.
    /// Between 10% and this ceiling the score falls linearly from 15.
    #[serde(default = "default_amount_ceiling")]
    pub amount_ceiling: f64,
    /// Points lost per day beyond 30 days apart, starting from 5. Must be positive.
    #[serde(default = "default_date_decay_per_day")]
    pub date_decay_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationConfig {
    /// Whether the external text generator may be called at all
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_min_score() -> f64 {
    50.0
}

fn default_amount_ceiling() -> f64 {
    0.40
}

fn default_date_decay_per_day() -> f64 {
    0.1
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            scoring: ScoringConfig::default(),
            explanation: ExplanationConfig::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            amount_ceiling: default_amount_ceiling(),
            date_decay_per_day: default_date_decay_per_day(),
        }
    }
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_timeout_ms(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
        }
    }
}

impl ExplanationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    /// Load from `reconciliation.*` in the working directory and `RECON__` env vars
    pub fn load() -> ReconResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from the given file stem (the file is optional) and `RECON__` env vars
    pub fn load_from(file_stem: &str) -> ReconResult<Self> {
        let config = Cfg::builder()
            .add_source(File::with_name(file_stem).required(false))
            .add_source(
                Environment::with_prefix("RECON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReconResult<()> {
        validate_min_score(self.min_score)?;

        if !self.scoring.amount_ceiling.is_finite() || self.scoring.amount_ceiling <= 0.10 {
            return Err(ReconError::Validation(format!(
                "Amount ceiling must be greater than 0.10, got {}",
                self.scoring.amount_ceiling
            )));
        }

        if !self.scoring.date_decay_per_day.is_finite() || self.scoring.date_decay_per_day <= 0.0 {
            return Err(ReconError::Validation(format!(
                "Date decay must be greater than zero, got {}",
                self.scoring.date_decay_per_day
            )));
        }

        if self.explanation.timeout_ms == 0 {
            return Err(ReconError::Validation(
                "Explanation timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_score, 50.0);
        assert!(!config.explanation.enabled);
        assert_eq!(config.explanation.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let stem = std::env::temp_dir().join(format!("recon-config-{}", uuid::Uuid::new_v4()));
        let path = stem.with_extension("toml");
        let contents = concat!(
            "min_score = 65.0\n\n",
            "[scoring]\namount_ceiling = 0.5\n\n",
            "[explanation]\nenabled = true\ntimeout_ms = 250\n",
        );
        std::fs::write(&path, contents).unwrap();

        let config = EngineConfig::load_from(stem.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.min_score, 65.0);
        assert_eq!(config.scoring.amount_ceiling, 0.5);
        assert_eq!(config.scoring.date_decay_per_day, 0.1);
        assert!(config.explanation.enabled);
        assert_eq!(config.explanation.timeout_ms, 250);
        assert_eq!(config.explanation.api_key, None);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let stem = std::env::temp_dir().join(format!("recon-missing-{}", uuid::Uuid::new_v4()));
        let config = EngineConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EngineConfig {
            min_score: 120.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ReconError::Validation(_))));

        let mut config = EngineConfig::default();
        config.scoring.amount_ceiling = 0.05;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scoring.date_decay_per_day = 0.0;
        assert!(matches!(config.validate(), Err(ReconError::Validation(_))));

        let mut config = EngineConfig::default();
        config.explanation.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
