//! # Training Pipeline
//!
//! The offline job that produces a [`ModelArtifact`]:
//!
//! 1. Encode every example with the shared encoder; drop those it rejects.
//! 2. Derive the feature schema from the encoded rows and build the matrix.
//! 3. Hold out a seeded test split.
//! 4. Select forest parameters by k-fold grid search on the training split.
//! 5. Fit the cross-validated calibrated estimator with those parameters.
//! 6. Report accuracy and the classification report on the held-out split.
//!
//! Any error aborts the run before a report is produced.

use crate::artifact::{ArtifactError, ModelArtifact, TrainingSummary};
use crate::train::calibration::{CalibratedForest, CalibrationError};
use crate::train::config::{ConfigError, TrainingConfig};
use crate::train::data::{TrainingDataError, TrainingExample};
use crate::train::matrix::{FeatureMatrix, encode_examples};
use crate::train::metrics::ClassificationReport;
use crate::train::search::{SearchError, SearchOutcome, SearchProgressObserver, grid_search};
use crate::train::split::{SplitError, train_test_split};
use ndarray::{ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Data(#[from] TrainingDataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Could not split the dataset: {0}")]
    Split(#[from] SplitError),
    #[error("Hyperparameter search failed: {0}")]
    Search(#[from] SearchError),
    #[error("Probability calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Could not assemble the model artifact: {0}")]
    Artifact(#[from] ArtifactError),
}

/// A finished training run.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub report: ClassificationReport,
    pub search: SearchOutcome,
}

/// Hold-out evaluation of an existing model.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub report: ClassificationReport,
    pub test_rows: usize,
    pub dropped_examples: usize,
}

/// Runs the full training pipeline on `dataset`.
pub fn train(
    dataset: &[TrainingExample],
    config: &TrainingConfig,
    progress: &mut dyn SearchProgressObserver,
) -> Result<TrainingOutcome, TrainingError> {
    config.validate()?;

    let encoded = encode_examples(dataset, config.variant);
    if encoded.rows.is_empty() {
        return Err(TrainingDataError::EmptyAfterFiltering {
            dropped: encoded.dropped_rows,
        }
        .into());
    }
    let matrix = FeatureMatrix::from_encoded(&encoded);
    log::info!(
        "Encoded {} examples under {} into {} features",
        matrix.x.nrows(),
        config.variant,
        matrix.schema.len()
    );

    let split = train_test_split(matrix.x.nrows(), config.test_fraction, config.seed)?;
    let x_train = matrix.x.select(Axis(0), &split.train);
    let y_train = matrix.y.select(Axis(0), &split.train);
    let positives = y_train.iter().filter(|&&label| label > 0.5).count();
    if positives == 0 || positives == y_train.len() {
        return Err(TrainingDataError::SingleClass.into());
    }
    log::info!(
        "Training on {} rows ({} positive), holding out {}",
        split.train.len(),
        positives,
        split.test.len()
    );

    let search = grid_search(
        x_train.view(),
        y_train.view(),
        &matrix.schema,
        &config.search,
        config.cv_folds,
        config.scoring,
        config.seed,
        progress,
    )?;

    log::info!(
        "Calibrating selected forest ({} calibration, {} folds)",
        config.calibration,
        config.calibration_folds
    );
    let estimator = CalibratedForest::fit(
        x_train.view(),
        y_train.view(),
        &matrix.schema,
        &search.best.params,
        config.calibration,
        config.calibration_folds,
        config.seed,
    )?;

    let x_test = matrix.x.select(Axis(0), &split.test);
    let truth: Vec<bool> = split.test.iter().map(|&i| matrix.y[i] > 0.5).collect();
    let report = hold_out_report(&estimator, x_test.view(), &truth);
    log::info!("Hold-out accuracy: {:.4}", report.accuracy);
    log::info!("Classification report:\n{report}");

    let summary = TrainingSummary {
        examples: dataset.len(),
        dropped_examples: encoded.dropped_rows,
        train_rows: split.train.len(),
        test_rows: split.test.len(),
        scoring: config.scoring,
        cv_score: search.best.mean_score,
        test_accuracy: report.accuracy,
        seed: config.seed,
        best_params: search.best.params,
    };
    let artifact = ModelArtifact::new(config.variant, estimator, summary)?;

    Ok(TrainingOutcome {
        artifact,
        report,
        search,
    })
}

/// Re-creates the seeded hold-out split of `dataset` and scores `artifact` on it.
///
/// The dataset is encoded with the artifact's own variant and aligned to its
/// schema, so models trained under any variant can be evaluated.
pub fn evaluate(
    artifact: &ModelArtifact,
    dataset: &[TrainingExample],
    config: &TrainingConfig,
) -> Result<Evaluation, TrainingError> {
    let encoded = encode_examples(dataset, artifact.variant());
    if encoded.rows.is_empty() {
        return Err(TrainingDataError::EmptyAfterFiltering {
            dropped: encoded.dropped_rows,
        }
        .into());
    }
    let matrix = FeatureMatrix::build(
        &encoded.rows,
        &encoded.labels,
        artifact.feature_schema().to_vec(),
    );
    let split = train_test_split(matrix.x.nrows(), config.test_fraction, config.seed)?;
    let x_test = matrix.x.select(Axis(0), &split.test);
    let truth: Vec<bool> = split.test.iter().map(|&i| encoded.labels[i]).collect();
    let report = hold_out_report(artifact.estimator(), x_test.view(), &truth);
    log::info!(
        "Evaluated on {} held-out rows: accuracy {:.4}",
        split.test.len(),
        report.accuracy
    );

    Ok(Evaluation {
        report,
        test_rows: split.test.len(),
        dropped_examples: encoded.dropped_rows,
    })
}

fn hold_out_report(
    estimator: &CalibratedForest,
    x: ArrayView2<f64>,
    truth: &[bool],
) -> ClassificationReport {
    let predicted: Vec<bool> = estimator
        .predict_batch(x)
        .into_iter()
        .map(|(positive, _)| positive)
        .collect();
    ClassificationReport::from_predictions(truth, &predicted)
}
