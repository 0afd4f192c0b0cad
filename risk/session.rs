//! # Inference Session
//!
//! Per-submission scoring: encode the answers with the variant the model was
//! trained under, align them to the model's feature schema, and read both the
//! class decision and the probability from one estimator call.
//!
//! Nothing here retries or falls back. Encoding and alignment are pure, so a
//! failure is a data error that the caller must surface.

use crate::align::align;
use crate::artifact::{ArtifactError, ModelArtifact};
use crate::encode::{EncodeError, RawAnswer, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Could not encode the submitted answers: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    Low,
    High,
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLabel::Low => "low",
            RiskLabel::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub label: RiskLabel,
    /// Calibrated probability of the positive class, finite and in `[0, 1]`.
    pub probability: f64,
}

/// Scores one questionnaire answer against a loaded model.
pub fn infer(raw: &RawAnswer, artifact: &ModelArtifact) -> Result<RiskResult, InferenceError> {
    let encoded = encode(raw, artifact.variant())?;
    let aligned = align(&encoded, artifact.feature_schema());
    let (positive, probability) = artifact.estimator().predict(aligned.values());
    let label = if positive {
        RiskLabel::High
    } else {
        RiskLabel::Low
    };
    log::debug!(
        "Scored {} answers into {} features: {label} ({probability:.4})",
        raw.len(),
        aligned.len()
    );
    Ok(RiskResult { label, probability })
}

/// A model loaded once and shared read-only across callers and threads.
#[derive(Debug, Clone)]
pub struct InferenceSession {
    artifact: Arc<ModelArtifact>,
}

impl InferenceSession {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        Ok(Self::from_artifact(ModelArtifact::load(path)?))
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self {
            artifact: Arc::new(artifact),
        }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn assess(&self, raw: &RawAnswer) -> Result<RiskResult, InferenceError> {
        infer(raw, &self.artifact)
    }
}

/// Caller-owned, ordered log of assessed probabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskHistory {
    probabilities: Vec<f64>,
}

impl RiskHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &RiskResult) {
        self.probabilities.push(result.probability);
    }

    /// `(prediction number, probability)` pairs; numbering starts at 1.
    pub fn points(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.probabilities
            .iter()
            .enumerate()
            .map(|(index, &probability)| (index + 1, probability))
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }
}
