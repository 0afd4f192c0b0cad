//! Training configuration: built-in defaults, optionally overridden by a TOML
//! file. Any key left out of the file keeps its default.

use crate::artifact::DEFAULT_MODEL_PATH;
use crate::encode::EncodingVariant;
use crate::train::calibration::CalibrationMethod;
use crate::train::metrics::ScoringMetric;
use crate::train::search::HyperparamSearchSpace;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub variant: EncodingVariant,
    pub search: HyperparamSearchSpace,
    pub cv_folds: usize,
    pub scoring: ScoringMetric,
    pub calibration: CalibrationMethod,
    pub calibration_folds: usize,
    /// Fraction of rows held out for the final evaluation.
    pub test_fraction: f64,
    pub seed: u64,
    pub output: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            variant: EncodingVariant::default(),
            search: HyperparamSearchSpace::default(),
            cv_folds: 3,
            scoring: ScoringMetric::default(),
            calibration: CalibrationMethod::default(),
            calibration_folds: 3,
            test_fraction: 0.2,
            seed: 42,
            output: PathBuf::from(DEFAULT_MODEL_PATH),
        }
    }
}

impl TrainingConfig {
    /// Reads a configuration file and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded training configuration from '{}'", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cv_folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if self.calibration_folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "calibration_folds must be at least 2, got {}",
                self.calibration_folds
            )));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_fraction must lie strictly between 0 and 1, got {}",
                self.test_fraction
            )));
        }
        let search = &self.search;
        let axes = [
            ("n_estimators", search.n_estimators.len()),
            ("max_depth", search.max_depth.len()),
            ("min_samples_split", search.min_samples_split.len()),
            ("min_samples_leaf", search.min_samples_leaf.len()),
            ("bootstrap", search.bootstrap.len()),
            ("max_samples", search.max_samples.len()),
        ];
        if let Some((axis, _)) = axes.iter().find(|(_, len)| *len == 0) {
            return Err(ConfigError::Invalid(format!(
                "search axis '{axis}' has no values"
            )));
        }
        if search.n_estimators.contains(&0) {
            return Err(ConfigError::Invalid(
                "n_estimators values must be positive".to_string(),
            ));
        }
        if search.min_samples_leaf.contains(&0) {
            return Err(ConfigError::Invalid(
                "min_samples_leaf values must be positive".to_string(),
            ));
        }
        if search
            .max_samples
            .iter()
            .any(|&f| !(f > 0.0 && f <= 1.0))
        {
            return Err(ConfigError::Invalid(
                "max_samples values must lie in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
