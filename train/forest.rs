//! # Random Forest Classifier
//!
//! A binary probabilistic classifier built from CART trees grown on bootstrap
//! samples with Gini impurity. Each tree stores, per leaf, the fraction of
//! positive training rows that reached it; the forest's probability is the
//! mean of those fractions across trees.
//!
//! The forest records the names of the feature columns it was fit on. That
//! record is the authoritative feature schema of any model built from it.

use ndarray::{ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tree-growing hyperparameters. One point of the search grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    /// Fraction of the training rows drawn for each tree.
    pub max_samples: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            max_samples: 1.0,
        }
    }
}

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("Cannot fit a forest on an empty training set.")]
    EmptyTrainingSet,
    #[error(
        "Feature matrix has {columns} columns but {names} feature names were supplied."
    )]
    FeatureNameMismatch { columns: usize, names: usize },
    #[error("Feature matrix has {rows} rows but {labels} labels were supplied.")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error("Invalid forest parameter: {0}")]
    InvalidParams(String),
}

/// A split decision: rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRule {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Fraction of positive training rows at this node.
    pub positive_fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitRule>,
}

/// A fitted tree, stored as a flat node array with the root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut node = &self.nodes[0];
        while let Some(split) = &node.split {
            let next = if row[split.feature] <= split.threshold {
                split.left
            } else {
                split.right
            };
            node = &self.nodes[next];
        }
        node.positive_fraction
    }

    /// Checks that every split references a valid feature and valid children
    /// that come after their parent, so traversal always terminates.
    pub fn validate(&self, num_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if !(0.0..=1.0).contains(&node.positive_fraction) {
                return Err(format!("node {index} has probability outside [0, 1]"));
            }
            if let Some(split) = &node.split {
                if split.feature >= num_features {
                    return Err(format!(
                        "node {index} splits on feature {} but only {num_features} features exist",
                        split.feature
                    ));
                }
                for child in [split.left, split.right] {
                    if child <= index || child >= self.nodes.len() {
                        return Err(format!("node {index} has invalid child index {child}"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    /// Training columns, in the order the trees index them.
    pub feature_names: Vec<String>,
    pub params: ForestParams,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fits a forest on `x` (rows × features) and 0/1 labels `y`.
    ///
    /// Trees are grown in parallel. Each tree draws from its own RNG seeded
    /// with `seed` and the tree index, so the result does not depend on
    /// thread scheduling.
    pub fn fit<'a>(
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
        feature_names: &[String],
        params: &'a ForestParams,
        seed: u64,
    ) -> Result<Self, ForestError> {
        if x.nrows() == 0 {
            return Err(ForestError::EmptyTrainingSet);
        }
        if x.ncols() != feature_names.len() {
            return Err(ForestError::FeatureNameMismatch {
                columns: x.ncols(),
                names: feature_names.len(),
            });
        }
        if x.nrows() != y.len() {
            return Err(ForestError::LabelCountMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }
        validate_params(params)?;

        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_index| {
                let mut rng = StdRng::seed_from_u64(
                    seed ^ (tree_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                );
                let sample = draw_sample(x.nrows(), params, &mut rng);
                TreeBuilder {
                    x,
                    y,
                    params,
                    max_features: max_features(x.ncols()),
                    nodes: Vec::new(),
                }
                .build(sample, &mut rng)
            })
            .collect();

        Ok(Self {
            feature_names: feature_names.to_vec(),
            params: *params,
            trees,
        })
    }

    /// Mean positive-class probability over all trees.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict_proba(row)).sum();
        total / self.trees.len() as f64
    }

    /// Positive-class probabilities for every row of `x`.
    pub fn predict_proba_batch(&self, x: ArrayView2<f64>) -> Vec<f64> {
        x.outer_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict_proba(slice),
                None => self.predict_proba(&row.to_vec()),
            })
            .collect()
    }
}

fn validate_params(params: &ForestParams) -> Result<(), ForestError> {
    if params.n_estimators == 0 {
        return Err(ForestError::InvalidParams(
            "n_estimators must be at least 1".to_string(),
        ));
    }
    if params.min_samples_split < 2 {
        return Err(ForestError::InvalidParams(
            "min_samples_split must be at least 2".to_string(),
        ));
    }
    if params.min_samples_leaf == 0 {
        return Err(ForestError::InvalidParams(
            "min_samples_leaf must be at least 1".to_string(),
        ));
    }
    if !(params.max_samples > 0.0 && params.max_samples <= 1.0) {
        return Err(ForestError::InvalidParams(format!(
            "max_samples must be in (0, 1], got {}",
            params.max_samples
        )));
    }
    Ok(())
}

/// Number of candidate features examined per split (square root rule).
fn max_features(num_features: usize) -> usize {
    ((num_features as f64).sqrt().round() as usize).clamp(1, num_features.max(1))
}

fn draw_sample(num_rows: usize, params: &ForestParams, rng: &mut StdRng) -> Vec<usize> {
    let size = ((num_rows as f64 * params.max_samples).round() as usize).clamp(1, num_rows);
    if params.bootstrap {
        (0..size).map(|_| rng.gen_range(0..num_rows)).collect()
    } else if size == num_rows {
        (0..num_rows).collect()
    } else {
        index::sample(rng, num_rows, size).into_vec()
    }
}

fn gini(positives: f64, total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    let p = positives / total;
    2.0 * p * (1.0 - p)
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    params: &'a ForestParams,
    max_features: usize,
    nodes: Vec<TreeNode>,
}

struct CandidateSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeBuilder<'_> {
    fn build(mut self, sample: Vec<usize>, rng: &mut StdRng) -> DecisionTree {
        self.grow(sample, 0, rng);
        DecisionTree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let total = rows.len() as f64;
        let positives: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let node_index = self.nodes.len();
        self.nodes.push(TreeNode {
            positive_fraction: positives / total,
            split: None,
        });

        let pure = positives == 0.0 || positives == total;
        if pure || depth >= self.params.max_depth || rows.len() < self.params.min_samples_split {
            return node_index;
        }

        let Some(best) = self.best_split(&rows, positives, rng) else {
            return node_index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x[[i, best.feature]] <= best.threshold);

        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[node_index].split = Some(SplitRule {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        });
        node_index
    }

    fn best_split(
        &self,
        rows: &[usize],
        positives: f64,
        rng: &mut StdRng,
    ) -> Option<CandidateSplit> {
        let num_features = self.x.ncols();
        // Visit features in random order; keep going past `max_features` only
        // while no usable split has been found.
        let features = index::sample(rng, num_features, num_features);
        let min_leaf = self.params.min_samples_leaf;
        let total = rows.len() as f64;
        let parent_impurity = total * gini(positives, total);

        let mut best: Option<CandidateSplit> = None;
        let mut ordered: Vec<(f64, f64)> = Vec::with_capacity(rows.len());
        for (visited, feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            ordered.clear();
            ordered.extend(rows.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_positives = 0.0;
            for k in 0..ordered.len() - 1 {
                left_positives += ordered[k].1;
                let left_count = k + 1;
                let right_count = ordered.len() - left_count;
                if ordered[k].0 == ordered[k + 1].0
                    || left_count < min_leaf
                    || right_count < min_leaf
                {
                    continue;
                }
                let impurity = left_count as f64 * gini(left_positives, left_count as f64)
                    + right_count as f64 * gini(positives - left_positives, right_count as f64);
                if impurity < best.as_ref().map_or(parent_impurity, |b| b.impurity) {
                    best = Some(CandidateSplit {
                        feature,
                        threshold: 0.5 * (ordered[k].0 + ordered[k + 1].0),
                        impurity,
                    });
                }
            }
        }
        best
    }
}
