//! Dataset-scale encoding: runs the shared encoder over every example,
//! derives the feature schema the way a one-hot expansion of the whole table
//! would, and lays the rows out as a dense matrix in that schema's order.

use crate::align::align_into;
use crate::encode::{EncodedRow, EncodingVariant, FeatureKind, encode, indicator_name};
use crate::train::data::TrainingExample;
use ahash::AHashSet;
use ndarray::{Array1, Array2};
use std::collections::BTreeSet;

/// Encoded examples that survived encoding, with their labels.
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub rows: Vec<EncodedRow>,
    pub labels: Vec<bool>,
    pub dropped_rows: usize,
}

/// Encodes every example with `variant`, dropping those that leave a required
/// factor unanswered and those the encoder rejects. Nothing is imputed.
pub fn encode_examples(examples: &[TrainingExample], variant: EncodingVariant) -> EncodedDataset {
    let mut rows = Vec::with_capacity(examples.len());
    let mut labels = Vec::with_capacity(examples.len());
    let mut dropped_rows = 0;
    for example in examples {
        if let Some(factor) = variant.missing_factor(&example.answer) {
            dropped_rows += 1;
            log::debug!("Dropping example without an answer for '{factor}'");
            continue;
        }
        match encode(&example.answer, variant) {
            Ok(row) => {
                rows.push(row);
                labels.push(example.treated);
            }
            Err(e) => {
                dropped_rows += 1;
                log::debug!("Dropping example that failed to encode: {e}");
            }
        }
    }
    if dropped_rows > 0 {
        log::warn!("Dropped {dropped_rows} incomplete or unencodable examples under {variant}");
    }
    EncodedDataset {
        rows,
        labels,
        dropped_rows,
    }
}

/// Derives the ordered feature schema of a set of encoded rows.
///
/// Non-indicator features come first in the order they are first seen.
/// Indicator features follow, grouped by factor in first-seen order, with
/// each factor's categories sorted. Only categories observed in the rows get
/// a column.
pub fn derive_schema(rows: &[EncodedRow]) -> Vec<String> {
    let mut plain: Vec<String> = Vec::new();
    let mut seen_plain: AHashSet<String> = AHashSet::new();
    let mut factors: Vec<(String, BTreeSet<String>)> = Vec::new();

    for row in rows {
        for feature in row.features() {
            match &feature.kind {
                FeatureKind::Indicator { factor, category } => {
                    match factors.iter_mut().find(|(name, _)| name == factor) {
                        Some((_, categories)) => {
                            categories.insert(category.clone());
                        }
                        None => factors.push((factor.clone(), BTreeSet::from([category.clone()]))),
                    }
                }
                FeatureKind::Binary | FeatureKind::DayCount | FeatureKind::Unclassified => {
                    if seen_plain.insert(feature.name.clone()) {
                        plain.push(feature.name.clone());
                    }
                }
            }
        }
    }

    plain
        .into_iter()
        .chain(factors.into_iter().flat_map(|(factor, categories)| {
            categories
                .into_iter()
                .map(move |category| indicator_name(&factor, &category))
        }))
        .collect()
}

/// Dense training matrix with its schema and 0/1 labels.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub schema: Vec<String>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl FeatureMatrix {
    /// Builds the matrix by aligning every row to `schema`.
    pub fn build(rows: &[EncodedRow], labels: &[bool], schema: Vec<String>) -> Self {
        let mut x = Array2::zeros((rows.len(), schema.len()));
        for (row, mut out) in rows.iter().zip(x.rows_mut()) {
            match out.as_slice_mut() {
                Some(slice) => align_into(row, &schema, slice),
                None => {
                    let mut buffer = vec![0.0; schema.len()];
                    align_into(row, &schema, &mut buffer);
                    out.assign(&Array1::from_vec(buffer));
                }
            }
        }
        let y = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        Self { schema, x, y }
    }

    /// Derives the schema from `rows` and builds the matrix.
    pub fn from_encoded(dataset: &EncodedDataset) -> Self {
        let schema = derive_schema(&dataset.rows);
        Self::build(&dataset.rows, &dataset.labels, schema)
    }
}
