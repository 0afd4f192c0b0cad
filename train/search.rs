//! # Hyperparameter Grid Search
//!
//! Exhaustive search over a declared finite grid of forest parameters. Every
//! candidate is scored by stratified k-fold cross-validation on the training
//! split; the candidate with the highest mean fold score wins, ties going to
//! the candidate that appears first in grid order.
//!
//! All candidate×fold fits are independent and read the same immutable
//! matrix, so they run in parallel.

use crate::train::forest::{ForestError, ForestParams, RandomForest};
use crate::train::metrics::ScoringMetric;
use crate::train::split::{SplitError, stratified_k_fold};
use itertools::iproduct;
use ndarray::{ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("The hyperparameter grid has no candidates; every axis needs at least one value.")]
    EmptyGrid,
    #[error("Could not build cross-validation folds: {0}")]
    Split(#[from] SplitError),
    #[error("A candidate fit failed: {0}")]
    Forest(#[from] ForestError),
}

/// Values to try along each forest parameter axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperparamSearchSpace {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub bootstrap: Vec<bool>,
    pub max_samples: Vec<f64>,
}

impl Default for HyperparamSearchSpace {
    fn default() -> Self {
        Self {
            n_estimators: vec![100, 200],
            max_depth: vec![10, 20],
            min_samples_split: vec![5, 10],
            min_samples_leaf: vec![2, 4],
            bootstrap: vec![true],
            max_samples: vec![1.0],
        }
    }
}

impl HyperparamSearchSpace {
    /// Cartesian product of all axes, in declaration order.
    pub fn candidates(&self) -> Vec<ForestParams> {
        iproduct!(
            self.n_estimators.iter(),
            self.max_depth.iter(),
            self.min_samples_split.iter(),
            self.min_samples_leaf.iter(),
            self.bootstrap.iter(),
            self.max_samples.iter()
        )
        .map(
            |(
                &n_estimators,
                &max_depth,
                &min_samples_split,
                &min_samples_leaf,
                &bootstrap,
                &max_samples,
            )| ForestParams {
                n_estimators,
                max_depth,
                min_samples_split,
                min_samples_leaf,
                bootstrap,
                max_samples,
            },
        )
        .collect()
    }
}

/// Stages reported while searching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchStage {
    CrossValidation,
}

impl SearchStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::CrossValidation => "cross-validated candidate fits",
        }
    }
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while searching.
pub trait SearchProgressObserver: Send {
    fn on_stage_start(&mut self, stage: SearchStage, total_fits: usize) {
        let _ = (stage, total_fits);
    }
    fn on_stage_advance(&mut self, stage: SearchStage, completed_fits: usize) {
        let _ = (stage, completed_fits);
    }
    fn on_stage_finish(&mut self, stage: SearchStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopSearchProgress;

impl SearchProgressObserver for NoopSearchProgress {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: CandidateScore,
    pub candidates: Vec<CandidateScore>,
}

/// Scores every grid candidate with k-fold cross-validation and returns the best.
pub fn grid_search(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    feature_names: &[String],
    space: &HyperparamSearchSpace,
    folds: usize,
    scoring: ScoringMetric,
    seed: u64,
    progress: &mut dyn SearchProgressObserver,
) -> Result<SearchOutcome, SearchError> {
    let candidates = space.candidates();
    if candidates.is_empty() {
        return Err(SearchError::EmptyGrid);
    }
    let labels = y.to_vec();
    let partitions = stratified_k_fold(&labels, folds, seed)?;

    let jobs: Vec<(usize, usize)> = iproduct!(0..candidates.len(), 0..partitions.len()).collect();
    log::info!(
        "Grid search: {} candidates x {} folds = {} fits, scoring by {}",
        candidates.len(),
        partitions.len(),
        jobs.len(),
        scoring
    );

    progress.on_stage_start(SearchStage::CrossValidation, jobs.len());
    let completed = Mutex::new((0usize, progress));
    let fold_results: Vec<Result<f64, ForestError>> = jobs
        .par_iter()
        .map(|&(candidate, fold_index)| -> Result<f64, ForestError> {
            let fold = &partitions[fold_index];
            let x_fit = x.select(Axis(0), &fold.train);
            let y_fit = y.select(Axis(0), &fold.train);
            let forest = RandomForest::fit(
                x_fit.view(),
                y_fit.view(),
                feature_names,
                &candidates[candidate],
                seed.wrapping_add(fold_index as u64),
            )?;

            let x_val = x.select(Axis(0), &fold.validation);
            let predicted: Vec<bool> = forest
                .predict_proba_batch(x_val.view())
                .into_iter()
                .map(|p| p > 0.5)
                .collect();
            let truth: Vec<bool> = fold.validation.iter().map(|&i| labels[i] > 0.5).collect();
            let score = scoring.score(&truth, &predicted);

            if let Ok(mut guard) = completed.lock() {
                guard.0 += 1;
                let done = guard.0;
                guard.1.on_stage_advance(SearchStage::CrossValidation, done);
            }
            Ok(score)
        })
        .collect();
    let (_, progress) = completed
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    progress.on_stage_finish(SearchStage::CrossValidation);

    let mut scored: Vec<CandidateScore> = candidates
        .iter()
        .map(|params| CandidateScore {
            params: *params,
            fold_scores: Vec::with_capacity(partitions.len()),
            mean_score: 0.0,
        })
        .collect();
    for (&(candidate, _), result) in jobs.iter().zip(fold_results) {
        scored[candidate].fold_scores.push(result?);
    }
    for candidate in &mut scored {
        candidate.mean_score =
            candidate.fold_scores.iter().sum::<f64>() / candidate.fold_scores.len() as f64;
        log::debug!("{:?} -> mean {} {:.4}", candidate.params, scoring, candidate.mean_score);
    }

    let mut best = &scored[0];
    for candidate in &scored[1..] {
        if candidate.mean_score > best.mean_score {
            best = candidate;
        }
    }
    let best = best.clone();
    log::info!(
        "Best parameters {:?} with mean {} {:.4}",
        best.params,
        scoring,
        best.mean_score
    );

    Ok(SearchOutcome {
        best,
        candidates: scored,
    })
}
