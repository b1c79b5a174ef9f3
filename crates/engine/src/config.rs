//! Optimization run configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::objective::{build_objective, ConstraintSpec, ObjectiveParams};
use crate::search::{SearchSettings, REGISTERED_ALGORITHMS};

fn default_max_failures() -> usize {
    10
}

/// The configuration block of one optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// `GridSearch` or `RandomSearch` (case-sensitive)
    pub algorithm: String,
    /// One of `objective::REGISTERED_OBJECTIVES` (case-sensitive)
    pub objective: String,
    #[serde(default)]
    pub objective_params: ObjectiveParams,
    #[serde(default)]
    pub constraints: Option<ConstraintSpec>,
    /// Required for `RandomSearch`, ignored by `GridSearch`
    #[serde(default)]
    pub max_trials: Option<usize>,
    /// The run aborts once failed trials exceed this count
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    /// Random search seed; `search::DEFAULT_RANDOM_SEED` when unset
    #[serde(default)]
    pub seed: Option<u64>,
    /// Skip random draws that repeat an earlier parameter set
    #[serde(default)]
    pub dedupe_samples: bool,
}

impl OptimizationConfig {
    pub fn new(algorithm: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            objective: objective.into(),
            objective_params: ObjectiveParams::default(),
            constraints: None,
            max_trials: None,
            max_failures: default_max_failures(),
            seed: None,
            dedupe_samples: false,
        }
    }

    /// Check names, search settings and constraints. Runs before any trial.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let objective = build_objective(&self.objective, &self.objective_params)?;

        if !REGISTERED_ALGORITHMS.contains(&self.algorithm.as_str()) {
            return Err(ConfigError::UnknownAlgorithm {
                name: self.algorithm.clone(),
                registered: REGISTERED_ALGORITHMS.to_vec(),
            });
        }

        if self.algorithm == "RandomSearch" && !matches!(self.max_trials, Some(n) if n > 0) {
            return Err(ConfigError::Invalid(
                "RandomSearch requires max_trials > 0".to_string(),
            ));
        }

        if !self.objective_params.risk_free_rate.is_finite() {
            return Err(ConfigError::Invalid(
                "risk_free_rate must be finite".to_string(),
            ));
        }

        if let Some(constraints) = &self.constraints {
            constraints.validate()?;
        }
        objective.check_constraints(self.constraints.as_ref())?;

        Ok(())
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            max_trials: self.max_trials,
            seed: self.seed,
            dedupe: self.dedupe_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config: OptimizationConfig =
            serde_json::from_str(r#"{"algorithm": "GridSearch", "objective": "SharpeRatio"}"#)
                .unwrap();
        assert_eq!(config.max_failures, 10);
        assert_eq!(config.seed, None);
        assert!(!config.dedupe_samples);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_from_json() {
        let config: OptimizationConfig = serde_json::from_str(
            r#"{
                "algorithm": "RandomSearch",
                "objective": "SharpeWithHoldPeriodConstraint",
                "objective_params": {"risk_free_rate": 0.02},
                "constraints": {"target_hold_period_days": [2.0, 10.0], "min_trades": 5},
                "max_trials": 50,
                "max_failures": 3,
                "seed": 7
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.constraints.as_ref().unwrap().target_hold_period_days,
            Some((2.0, 10.0))
        );
        let settings = config.search_settings();
        assert_eq!(settings.max_trials, Some(50));
        assert_eq!(settings.seed, Some(7));
    }

    #[test]
    fn test_validation_failures() {
        let lowercase = OptimizationConfig::new("GridSearch", "sharpe");
        assert!(matches!(
            lowercase.validate(),
            Err(ConfigError::UnknownObjective { .. })
        ));

        let algorithm = OptimizationConfig::new("Bayesian", "SharpeRatio");
        assert!(matches!(
            algorithm.validate(),
            Err(ConfigError::UnknownAlgorithm { .. })
        ));

        let no_trials = OptimizationConfig::new("RandomSearch", "SharpeRatio");
        assert!(matches!(no_trials.validate(), Err(ConfigError::Invalid(_))));

        let no_range = OptimizationConfig::new("GridSearch", "SharpeWithHoldPeriodConstraint");
        assert!(matches!(
            no_range.validate(),
            Err(ConfigError::InvalidConstraint(_))
        ));
    }
}
