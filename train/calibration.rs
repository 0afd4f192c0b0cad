//! # Probability Calibration
//!
//! Random forest scores rank rows well but are not reliable probabilities.
//! The user-facing output of this crate is a percentage, so every persisted
//! estimator is wrapped in a calibration step:
//!
//! - [`IsotonicRegression`]: non-parametric, monotone step map fitted with the
//!   pool-adjacent-violators algorithm.
//! - [`SigmoidCalibrator`]: Platt scaling, `p = 1 / (1 + exp(a*s + b))`.
//!
//! [`CalibratedForest`] fits one forest per cross-validation fold on the
//! remaining folds, fits a calibrator on the held-out fold's scores, and
//! averages the calibrated probabilities of all members at prediction time.

use crate::train::forest::{ForestError, ForestParams, RandomForest};
use crate::train::split::{SplitError, stratified_k_fold};
use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration needs at least one score.")]
    EmptyInput,
    #[error("Got {scores} scores but {labels} labels.")]
    LengthMismatch { scores: usize, labels: usize },
    #[error("Non-finite score encountered during calibration.")]
    NonFiniteScore,
    #[error("Forest fitting failed inside a calibration fold: {0}")]
    Forest(#[from] ForestError),
    #[error("Could not build calibration folds: {0}")]
    Split(#[from] SplitError),
}

/// Calibration method applied on top of the selected forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    #[default]
    Isotonic,
    Sigmoid,
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Isotonic => "isotonic",
            Self::Sigmoid => "sigmoid",
        })
    }
}

/// Maps raw classifier scores to calibrated probabilities.
pub trait Calibrator {
    /// Fits the calibrator on raw scores and 0/1 labels.
    fn fit(scores: &[f64], labels: &[f64]) -> Result<Self, CalibrationError>
    where
        Self: Sized;

    /// Calibrated probability for one raw score.
    fn calibrate(&self, score: f64) -> f64;
}

fn check_inputs(scores: &[f64], labels: &[f64]) -> Result<(), CalibrationError> {
    if scores.is_empty() {
        return Err(CalibrationError::EmptyInput);
    }
    if scores.len() != labels.len() {
        return Err(CalibrationError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(CalibrationError::NonFiniteScore);
    }
    Ok(())
}

/// Monotone piecewise-linear calibration map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicRegression {
    /// Increasing knot positions in score space.
    pub thresholds: Vec<f64>,
    /// Non-decreasing calibrated values at each knot.
    pub values: Vec<f64>,
}

impl Calibrator for IsotonicRegression {
    fn fit(scores: &[f64], labels: &[f64]) -> Result<Self, CalibrationError> {
        check_inputs(scores, labels)?;

        let mut pairs: Vec<(f64, f64)> = scores.iter().copied().zip(labels.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Blocks of (mean score, mean label, weight); equal scores start pooled.
        let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(pairs.len());
        for (score, label) in pairs {
            match blocks.last_mut() {
                Some(last) if last.0 == score => {
                    last.1 = (last.1 * last.2 + label) / (last.2 + 1.0);
                    last.2 += 1.0;
                }
                _ => blocks.push((score, label, 1.0)),
            }
        }
        let knots: Vec<f64> = blocks.iter().map(|b| b.0).collect();

        // Pool adjacent violators over (value, weight, number of knots covered).
        let mut pooled: Vec<(f64, f64, usize)> = Vec::with_capacity(blocks.len());
        for &(_, value, weight) in &blocks {
            pooled.push((value, weight, 1));
            while pooled.len() > 1 {
                let (v2, w2, n2) = pooled[pooled.len() - 1];
                let (v1, w1, n1) = pooled[pooled.len() - 2];
                if v1 <= v2 {
                    break;
                }
                pooled.pop();
                let last = pooled.len() - 1;
                pooled[last] = ((v1 * w1 + v2 * w2) / (w1 + w2), w1 + w2, n1 + n2);
            }
        }

        let values: Vec<f64> = pooled
            .iter()
            .flat_map(|&(value, _, count)| std::iter::repeat_n(value.clamp(0.0, 1.0), count))
            .collect();

        Ok(Self {
            thresholds: knots,
            values,
        })
    }

    fn calibrate(&self, score: f64) -> f64 {
        let n = self.thresholds.len();
        if n == 0 {
            return score.clamp(0.0, 1.0);
        }
        if score <= self.thresholds[0] {
            return self.values[0];
        }
        if score >= self.thresholds[n - 1] {
            return self.values[n - 1];
        }
        let upper = self.thresholds.partition_point(|&t| t < score);
        let lower = upper - 1;
        let span = self.thresholds[upper] - self.thresholds[lower];
        let weight = (score - self.thresholds[lower]) / span;
        self.values[lower] + weight * (self.values[upper] - self.values[lower])
    }
}

/// Platt scaling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmoidCalibrator {
    pub a: f64,
    pub b: f64,
}

impl SigmoidCalibrator {
    const MAX_ITERATIONS: usize = 100;
    const MIN_STEP: f64 = 1e-10;
    const HESSIAN_RIDGE: f64 = 1e-12;
    const GRADIENT_TOLERANCE: f64 = 1e-5;

    /// Negative log-likelihood of the smoothed targets under parameters `(a, b)`.
    fn objective(scores: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
        scores
            .iter()
            .zip(targets)
            .map(|(&s, &t)| {
                let f = s * a + b;
                if f >= 0.0 {
                    t * f + (-f).exp().ln_1p()
                } else {
                    (t - 1.0) * f + f.exp().ln_1p()
                }
            })
            .sum()
    }
}

impl Calibrator for SigmoidCalibrator {
    /// Newton's method with backtracking on Platt's smoothed targets.
    fn fit(scores: &[f64], labels: &[f64]) -> Result<Self, CalibrationError> {
        check_inputs(scores, labels)?;

        let num_positive = labels.iter().filter(|&&l| l > 0.5).count() as f64;
        let num_negative = labels.len() as f64 - num_positive;
        let high_target = (num_positive + 1.0) / (num_positive + 2.0);
        let low_target = 1.0 / (num_negative + 2.0);
        let targets: Vec<f64> = labels
            .iter()
            .map(|&l| if l > 0.5 { high_target } else { low_target })
            .collect();

        let mut a = 0.0;
        let mut b = ((num_negative + 1.0) / (num_positive + 1.0)).ln();
        let mut value = Self::objective(scores, &targets, a, b);

        for iteration in 0..Self::MAX_ITERATIONS {
            let (mut h11, mut h22, mut h21) = (Self::HESSIAN_RIDGE, Self::HESSIAN_RIDGE, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&s, &t) in scores.iter().zip(&targets) {
                let f = s * a + b;
                let (p, q) = if f >= 0.0 {
                    let e = (-f).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = f.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += s * s * d2;
                h22 += d2;
                h21 += s * d2;
                let d1 = t - p;
                g1 += s * d1;
                g2 += d1;
            }

            if g1.abs() < Self::GRADIENT_TOLERANCE && g2.abs() < Self::GRADIENT_TOLERANCE {
                log::debug!("Sigmoid calibration converged after {iteration} iterations");
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let delta_a = -(h22 * g1 - h21 * g2) / det;
            let delta_b = -(-h21 * g1 + h11 * g2) / det;
            let directional = g1 * delta_a + g2 * delta_b;

            let mut step = 1.0;
            let mut accepted = false;
            while step >= Self::MIN_STEP {
                let trial_a = a + step * delta_a;
                let trial_b = b + step * delta_b;
                let trial = Self::objective(scores, &targets, trial_a, trial_b);
                if trial < value + 1e-4 * step * directional {
                    a = trial_a;
                    b = trial_b;
                    value = trial;
                    accepted = true;
                    break;
                }
                step /= 2.0;
            }
            if !accepted {
                log::warn!("Sigmoid calibration line search stalled at iteration {iteration}");
                break;
            }
        }

        Ok(Self { a, b })
    }

    fn calibrate(&self, score: f64) -> f64 {
        let f = (score * self.a + self.b).clamp(-700.0, 700.0);
        1.0 / (1.0 + f.exp())
    }
}

/// A fitted calibrator of either kind, tagged by method on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ProbabilityCalibrator {
    Isotonic(IsotonicRegression),
    Sigmoid(SigmoidCalibrator),
}

impl ProbabilityCalibrator {
    pub fn fit(
        method: CalibrationMethod,
        scores: &[f64],
        labels: &[f64],
    ) -> Result<Self, CalibrationError> {
        Ok(match method {
            CalibrationMethod::Isotonic => Self::Isotonic(IsotonicRegression::fit(scores, labels)?),
            CalibrationMethod::Sigmoid => Self::Sigmoid(SigmoidCalibrator::fit(scores, labels)?),
        })
    }

    pub fn calibrate(&self, score: f64) -> f64 {
        match self {
            Self::Isotonic(iso) => iso.calibrate(score),
            Self::Sigmoid(sig) => sig.calibrate(score),
        }
    }
}

/// One cross-validation member: a forest and the calibrator fit on its held-out fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedMember {
    pub forest: RandomForest,
    pub calibrator: ProbabilityCalibrator,
}

/// The persisted estimator: calibrated forests whose probabilities are averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedForest {
    pub method: CalibrationMethod,
    pub members: Vec<CalibratedMember>,
}

impl CalibratedForest {
    /// Cross-validated calibration of a forest with fixed `params`.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        feature_names: &[String],
        params: &ForestParams,
        method: CalibrationMethod,
        folds: usize,
        seed: u64,
    ) -> Result<Self, CalibrationError> {
        let labels = y.to_vec();
        let partitions = stratified_k_fold(&labels, folds, seed)?;

        let mut members = Vec::with_capacity(partitions.len());
        for (fold_index, fold) in partitions.iter().enumerate() {
            let x_fit = x.select(Axis(0), &fold.train);
            let y_fit = y.select(Axis(0), &fold.train);
            let forest = RandomForest::fit(
                x_fit.view(),
                y_fit.view(),
                feature_names,
                params,
                seed.wrapping_add(fold_index as u64 + 1),
            )?;

            let x_held = x.select(Axis(0), &fold.validation);
            let scores = forest.predict_proba_batch(x_held.view());
            let held_labels: Vec<f64> = fold.validation.iter().map(|&i| labels[i]).collect();
            let calibrator = ProbabilityCalibrator::fit(method, &scores, &held_labels)?;
            log::debug!(
                "Calibration fold {}/{}: {} fit rows, {} held-out rows",
                fold_index + 1,
                partitions.len(),
                fold.train.len(),
                fold.validation.len()
            );
            members.push(CalibratedMember { forest, calibrator });
        }

        Ok(Self { method, members })
    }

    /// Training columns recorded by the first member's forest.
    pub fn feature_names(&self) -> Option<&[String]> {
        self.members
            .first()
            .map(|member| member.forest.feature_names.as_slice())
    }

    /// Averaged calibrated probability of the positive class, in `[0, 1]`.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .members
            .iter()
            .map(|m| m.calibrator.calibrate(m.forest.predict_proba(row)))
            .sum();
        let mean = total / self.members.len() as f64;
        if mean.is_finite() {
            mean.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Class decision and positive probability from a single evaluation.
    ///
    /// The decision is the argmax over the two class probabilities, so a
    /// probability of exactly 0.5 resolves to the negative class.
    pub fn predict(&self, row: &[f64]) -> (bool, f64) {
        let probability = self.predict_proba(row);
        (probability > 0.5, probability)
    }

    pub fn predict_batch(&self, x: ArrayView2<f64>) -> Vec<(bool, f64)> {
        x.outer_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict(slice),
                None => self.predict(&row.to_vec()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn noisy_scores() -> (Vec<f64>, Vec<f64>) {
        let scores: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let labels: Vec<f64> = (0..100)
            .map(|i| if (i * 37) % 100 < i { 1.0 } else { 0.0 })
            .collect();
        (scores, labels)
    }

    #[test]
    fn isotonic_output_is_monotone_and_bounded() {
        let (scores, labels) = noisy_scores();
        let iso = IsotonicRegression::fit(&scores, &labels).unwrap();

        let mut previous = f64::NEG_INFINITY;
        for step in 0..=200 {
            let p = iso.calibrate(-0.5 + step as f64 / 100.0);
            assert!((0.0..=1.0).contains(&p));
            assert!(p >= previous - 1e-12);
            previous = p;
        }
    }

    #[test]
    fn isotonic_pools_violators() {
        let iso = IsotonicRegression::fit(&[0.1, 0.2, 0.3, 0.4], &[0.0, 1.0, 0.0, 1.0]).unwrap();
        assert_eq!(iso.values, vec![0.0, 0.5, 0.5, 1.0]);
        assert_abs_diff_eq!(iso.calibrate(0.25), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(iso.calibrate(0.05), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(iso.calibrate(0.9), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn isotonic_merges_tied_scores() {
        let iso = IsotonicRegression::fit(&[0.5, 0.5, 0.5, 0.9], &[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(iso.thresholds, vec![0.5, 0.9]);
        assert_abs_diff_eq!(iso.values[0], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn sigmoid_is_monotone_for_informative_scores() {
        let (scores, labels) = noisy_scores();
        let sig = SigmoidCalibrator::fit(&scores, &labels).unwrap();
        assert!(sig.a < 0.0);
        assert!(sig.calibrate(0.9) > sig.calibrate(0.1));
        for s in [-5.0, 0.0, 0.5, 1.0, 5.0] {
            assert!((0.0..=1.0).contains(&sig.calibrate(s)));
        }
    }

    #[test]
    fn calibrator_rejects_bad_input() {
        assert!(matches!(
            IsotonicRegression::fit(&[], &[]),
            Err(CalibrationError::EmptyInput)
        ));
        assert!(matches!(
            SigmoidCalibrator::fit(&[0.1, 0.2], &[1.0]),
            Err(CalibrationError::LengthMismatch { .. })
        ));
        assert!(matches!(
            IsotonicRegression::fit(&[f64::NAN], &[1.0]),
            Err(CalibrationError::NonFiniteScore)
        ));
    }

    #[test]
    fn calibrated_forest_has_one_member_per_fold() {
        let n = 90;
        let mut x = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            x[[i, 0]] = (i % 2) as f64;
            x[[i, 1]] = (i % 3) as f64;
            y[i] = (i % 2) as f64;
        }
        let names = vec!["a".to_string(), "b".to_string()];
        let params = ForestParams {
            n_estimators: 8,
            ..ForestParams::default()
        };
        let model = CalibratedForest::fit(
            x.view(),
            y.view(),
            &names,
            &params,
            CalibrationMethod::Isotonic,
            3,
            11,
        )
        .unwrap();

        assert_eq!(model.members.len(), 3);
        assert_eq!(model.feature_names(), Some(names.as_slice()));
        let (positive, p) = model.predict(&[1.0, 0.0]);
        assert!(positive);
        assert!(p > 0.5 && p <= 1.0);
        let (negative, q) = model.predict(&[0.0, 0.0]);
        assert!(!negative);
        assert!(q < 0.5);
    }
}
