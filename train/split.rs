//! Seeded row splits: one hold-out split for evaluation and stratified
//! k-fold partitions for model selection and calibration.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("Test fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidFraction(f64),
    #[error("Cannot split {rows} rows into {folds} folds.")]
    TooFewRows { rows: usize, folds: usize },
    #[error("At least 2 folds are required, got {0}.")]
    InvalidFoldCount(usize),
}

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// One fold of a k-fold partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Shuffles `0..num_rows` with `seed` and holds out `ceil(num_rows * test_fraction)` rows.
pub fn train_test_split(
    num_rows: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<HoldoutSplit, SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(test_fraction));
    }
    let num_test = (num_rows as f64 * test_fraction).ceil() as usize;
    if num_rows < 2 || num_test == 0 || num_test >= num_rows {
        return Err(SplitError::TooFewRows {
            rows: num_rows,
            folds: 2,
        });
    }

    let mut order: Vec<usize> = (0..num_rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = order.split_off(num_test);
    Ok(HoldoutSplit { train, test: order })
}

/// Partitions row indices into `k` folds that keep the class balance of `labels`.
///
/// Rows of each class are shuffled independently and dealt round-robin, so
/// every fold receives a near-equal share of both classes.
pub fn stratified_k_fold(labels: &[f64], k: usize, seed: u64) -> Result<Vec<Fold>, SplitError> {
    if k < 2 {
        return Err(SplitError::InvalidFoldCount(k));
    }
    if labels.len() < k {
        return Err(SplitError::TooFewRows {
            rows: labels.len(),
            folds: k,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut negatives: Vec<usize> = Vec::new();
    let mut positives: Vec<usize> = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        if label > 0.5 {
            positives.push(i);
        } else {
            negatives.push(i);
        }
    }
    negatives.shuffle(&mut rng);
    positives.shuffle(&mut rng);

    let mut assignment = vec![0usize; labels.len()];
    for (position, &row) in negatives.iter().chain(positives.iter()).enumerate() {
        assignment[row] = position % k;
    }

    Ok((0..k)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&row| assignment[row] == fold);
            Fold { train, validation }
        })
        .collect())
}
