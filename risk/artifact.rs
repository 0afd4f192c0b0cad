//! # Model Artifact
//!
//! A trained model as persisted on disk: the calibrated estimator, the
//! encoding variant it was fit under, and a summary of the training run.
//!
//! The feature schema is not stored as a separate list. It is read back from
//! the training columns each forest recorded when it was fit, checked for
//! consistency across members, and held as an immutable field for the life of
//! the process. A file that does not yield a usable schema fails to load.

use crate::encode::EncodingVariant;
use crate::train::calibration::CalibratedForest;
use crate::train::forest::ForestParams;
use crate::train::metrics::ScoringMetric;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Where the training pipeline writes, and the CLI reads, the model by default.
pub const DEFAULT_MODEL_PATH: &str = "models/mental_health_model.toml";

/// Version of the on-disk layout written by [`ModelArtifact::save`].
pub const FORMAT_VERSION: u32 = 1;

/// Failure to produce a usable model from a file. Fatal: no inference may run.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Model file has format version {found}; this build reads version {expected}.")]
    UnsupportedFormatVersion { found: u32, expected: u32 },
    #[error("Model file contains no calibrated estimators.")]
    NoMembers,
    #[error("Model file does not record any training features.")]
    EmptySchema,
    #[error(
        "Calibrated member {member} was trained on a different feature list than member 0."
    )]
    SchemaDisagreement { member: usize },
    #[error("Tree {tree} of calibrated member {member} is malformed: {reason}")]
    MalformedTree {
        member: usize,
        tree: usize,
        reason: String,
    },
}

/// Facts about the run that produced an artifact, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub examples: usize,
    pub dropped_examples: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub scoring: ScoringMetric,
    pub cv_score: f64,
    pub test_accuracy: f64,
    pub seed: u64,
    pub best_params: ForestParams,
}

#[derive(Serialize, Deserialize)]
struct ArtifactFile {
    format_version: u32,
    variant: EncodingVariant,
    summary: TrainingSummary,
    estimator: CalibratedForest,
}

/// A loaded, validated model. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    variant: EncodingVariant,
    estimator: CalibratedForest,
    summary: TrainingSummary,
    feature_schema: Vec<String>,
}

impl ModelArtifact {
    /// Validates an estimator and derives its feature schema.
    pub fn new(
        variant: EncodingVariant,
        estimator: CalibratedForest,
        summary: TrainingSummary,
    ) -> Result<Self, ArtifactError> {
        let feature_schema = recorded_schema(&estimator)?;
        Ok(Self {
            variant,
            estimator,
            summary,
            feature_schema,
        })
    }

    /// Feature names in the exact column order the estimator was fit on.
    pub fn feature_schema(&self) -> &[String] {
        &self.feature_schema
    }

    /// Encoding the estimator expects its input to be produced with.
    pub fn variant(&self) -> EncodingVariant {
        self.variant
    }

    pub fn estimator(&self) -> &CalibratedForest {
        &self.estimator
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    /// Writes the artifact as TOML, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = ArtifactFile {
            format_version: FORMAT_VERSION,
            variant: self.variant,
            summary: self.summary.clone(),
            estimator: self.estimator.clone(),
        };
        let toml_string = toml::to_string_pretty(&file)?;
        let mut writer = BufWriter::new(fs::File::create(path)?);
        writer.write_all(toml_string.as_bytes())?;
        writer.flush()?;
        log::info!(
            "Saved model ({} features, {} calibrated members) to '{}'",
            self.feature_schema.len(),
            self.estimator.members.len(),
            path.display()
        );
        Ok(())
    }

    /// Loads and validates an artifact. Any failure is fatal for inference.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let toml_string = fs::read_to_string(path)?;
        let file: ArtifactFile = toml::from_str(&toml_string)?;
        if file.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedFormatVersion {
                found: file.format_version,
                expected: FORMAT_VERSION,
            });
        }
        let artifact = Self::new(file.variant, file.estimator, file.summary)?;
        log::debug!(
            "Loaded model from '{}': variant {}, {} features",
            path.display(),
            artifact.variant,
            artifact.feature_schema.len()
        );
        Ok(artifact)
    }
}

fn recorded_schema(estimator: &CalibratedForest) -> Result<Vec<String>, ArtifactError> {
    let schema = estimator.feature_names().ok_or(ArtifactError::NoMembers)?;
    if schema.is_empty() {
        return Err(ArtifactError::EmptySchema);
    }
    for (member_index, member) in estimator.members.iter().enumerate() {
        if member.forest.feature_names != schema {
            return Err(ArtifactError::SchemaDisagreement {
                member: member_index,
            });
        }
        if member.forest.trees.is_empty() {
            return Err(ArtifactError::MalformedTree {
                member: member_index,
                tree: 0,
                reason: "forest has no trees".to_string(),
            });
        }
        for (tree_index, tree) in member.forest.trees.iter().enumerate() {
            tree.validate(schema.len())
                .map_err(|reason| ArtifactError::MalformedTree {
                    member: member_index,
                    tree: tree_index,
                    reason,
                })?;
        }
    }
    Ok(schema.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::calibration::{
        CalibratedMember, CalibrationMethod, IsotonicRegression, ProbabilityCalibrator,
    };
    use crate::train::forest::{DecisionTree, RandomForest, SplitRule, TreeNode};
    use tempfile::tempdir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// A single split on feature 0 at 0.5: left 0.2, right 0.9.
    fn stump() -> DecisionTree {
        DecisionTree {
            nodes: vec![
                TreeNode {
                    positive_fraction: 0.5,
                    split: Some(SplitRule {
                        feature: 0,
                        threshold: 0.5,
                        left: 1,
                        right: 2,
                    }),
                },
                TreeNode {
                    positive_fraction: 0.2,
                    split: None,
                },
                TreeNode {
                    positive_fraction: 0.9,
                    split: None,
                },
            ],
        }
    }

    fn member(schema: &[&str], trees: Vec<DecisionTree>) -> CalibratedMember {
        CalibratedMember {
            forest: RandomForest {
                feature_names: names(schema),
                params: ForestParams::default(),
                trees,
            },
            calibrator: ProbabilityCalibrator::Isotonic(IsotonicRegression {
                thresholds: vec![0.0, 1.0],
                values: vec![0.0, 1.0],
            }),
        }
    }

    fn summary() -> TrainingSummary {
        TrainingSummary {
            examples: 10,
            dropped_examples: 0,
            train_rows: 8,
            test_rows: 2,
            scoring: ScoringMetric::Accuracy,
            cv_score: 0.75,
            test_accuracy: 1.0,
            seed: 42,
            best_params: ForestParams::default(),
        }
    }

    fn estimator(members: Vec<CalibratedMember>) -> CalibratedForest {
        CalibratedForest {
            method: CalibrationMethod::Isotonic,
            members,
        }
    }

    #[test]
    fn schema_comes_from_recorded_training_columns() {
        let artifact = ModelArtifact::new(
            EncodingVariant::RawDayCount,
            estimator(vec![member(&["A", "B", "C"], vec![stump()])]),
            summary(),
        )
        .unwrap();
        assert_eq!(artifact.feature_schema(), names(&["A", "B", "C"]).as_slice());
        assert_eq!(artifact.variant(), EncodingVariant::RawDayCount);
    }

    #[test]
    fn save_and_load_preserve_schema_variant_and_predictions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("model.toml");
        let artifact = ModelArtifact::new(
            EncodingVariant::WithoutDayCount,
            estimator(vec![
                member(&["A", "B", "C"], vec![stump(), stump()]),
                member(&["A", "B", "C"], vec![stump()]),
            ]),
            summary(),
        )
        .unwrap();

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        assert_eq!(loaded, artifact);
        for row in [[0.0, 1.0, 1.0], [1.0, 0.0, 0.0]] {
            assert_eq!(
                loaded.estimator().predict(&row),
                artifact.estimator().predict(&row)
            );
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = ModelArtifact::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io(_)));
    }

    #[test]
    fn garbage_file_fails_to_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.toml");
        fs::write(&path, "this is = not [a model").unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ArtifactError::TomlParse(_))
        ));
    }

    #[test]
    fn future_format_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.toml");
        let artifact = ModelArtifact::new(
            EncodingVariant::default(),
            estimator(vec![member(&["A"], vec![stump()])]),
            summary(),
        )
        .unwrap();
        artifact.save(&path).unwrap();
        let text = fs::read_to_string(&path)
            .unwrap()
            .replace("format_version = 1", "format_version = 2");
        fs::write(&path, text).unwrap();

        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ArtifactError::UnsupportedFormatVersion {
                found: 2,
                expected: 1
            })
        ));
    }

    #[test]
    fn rejects_estimators_without_a_usable_schema() {
        assert!(matches!(
            ModelArtifact::new(EncodingVariant::default(), estimator(Vec::new()), summary()),
            Err(ArtifactError::NoMembers)
        ));
        assert!(matches!(
            ModelArtifact::new(
                EncodingVariant::default(),
                estimator(vec![member(&[], vec![stump()])]),
                summary()
            ),
            Err(ArtifactError::EmptySchema)
        ));
        assert!(matches!(
            ModelArtifact::new(
                EncodingVariant::default(),
                estimator(vec![
                    member(&["A", "B"], vec![stump()]),
                    member(&["B", "A"], vec![stump()]),
                ]),
                summary()
            ),
            Err(ArtifactError::SchemaDisagreement { member: 1 })
        ));
    }

    #[test]
    fn rejects_trees_indexing_past_the_schema() {
        let mut tree = stump();
        if let Some(split) = tree.nodes[0].split.as_mut() {
            split.feature = 3;
        }
        let err = ModelArtifact::new(
            EncodingVariant::default(),
            estimator(vec![member(&["A", "B"], vec![stump(), tree])]),
            summary(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::MalformedTree {
                member: 0,
                tree: 1,
                ..
            }
        ));
    }
}
