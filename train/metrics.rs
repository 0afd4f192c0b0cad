//! Evaluation metrics for binary predictions: accuracy and a per-class
//! precision / recall / F1 report laid out like the classic text report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric maximized during hyperparameter search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMetric {
    #[default]
    Accuracy,
    /// F1 of the positive class.
    F1,
    /// Mean of the per-class recalls.
    BalancedAccuracy,
}

impl ScoringMetric {
    pub fn score(self, truth: &[bool], predicted: &[bool]) -> f64 {
        let matrix = ConfusionMatrix::from_predictions(truth, predicted);
        match self {
            Self::Accuracy => matrix.accuracy(),
            Self::F1 => matrix.class_metrics(true).f1,
            Self::BalancedAccuracy => {
                0.5 * (matrix.class_metrics(true).recall + matrix.class_metrics(false).recall)
            }
        }
    }
}

impl fmt::Display for ScoringMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accuracy => "accuracy",
            Self::F1 => "f1",
            Self::BalancedAccuracy => "balanced_accuracy",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[bool], predicted: &[bool]) -> Self {
        let mut matrix = Self::default();
        for (&actual, &guess) in truth.iter().zip(predicted) {
            match (actual, guess) {
                (true, true) => matrix.true_positive += 1,
                (false, true) => matrix.false_positive += 1,
                (false, false) => matrix.true_negative += 1,
                (true, false) => matrix.false_negative += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    /// Precision, recall and F1 treating `positive` as the class of interest.
    pub fn class_metrics(&self, positive: bool) -> ClassMetrics {
        let (hits, false_alarms, misses) = if positive {
            (self.true_positive, self.false_positive, self.false_negative)
        } else {
            (self.true_negative, self.false_negative, self.false_positive)
        };
        let precision = ratio(hits, hits + false_alarms);
        let recall = ratio(hits, hits + misses);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassMetrics {
            precision,
            recall,
            f1,
            support: hits + misses,
        }
    }
}

/// Zero when the denominator is zero, matching the usual report convention.
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Hold-out evaluation of a binary classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn from_predictions(truth: &[bool], predicted: &[bool]) -> Self {
        let confusion = ConfusionMatrix::from_predictions(truth, predicted);
        let negative = confusion.class_metrics(false);
        let positive = confusion.class_metrics(true);
        let support = negative.support + positive.support;

        let macro_avg = ClassMetrics {
            precision: 0.5 * (negative.precision + positive.precision),
            recall: 0.5 * (negative.recall + positive.recall),
            f1: 0.5 * (negative.f1 + positive.f1),
            support,
        };
        let weight = |metric: fn(&ClassMetrics) -> f64| {
            if support == 0 {
                0.0
            } else {
                (metric(&negative) * negative.support as f64
                    + metric(&positive) * positive.support as f64)
                    / support as f64
            }
        };
        let weighted_avg = ClassMetrics {
            precision: weight(|m| m.precision),
            recall: weight(|m| m.recall),
            f1: weight(|m| m.f1),
            support,
        };

        Self {
            confusion,
            accuracy: confusion.accuracy(),
            negative,
            positive,
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, metrics) in [("0", &self.negative), ("1", &self.positive)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, metrics.precision, metrics.recall, metrics.f1, metrics.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, metrics) in [
            ("macro avg", &self.macro_avg),
            ("weighted avg", &self.weighted_avg),
        ] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, metrics.precision, metrics.recall, metrics.f1, metrics.support
            )?;
        }
        Ok(())
    }
}
