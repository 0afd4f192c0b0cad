//! # Schema Alignment
//!
//! Projects an [`EncodedRow`] onto the ordered feature schema a model was fit
//! on. This is the compatibility shim between the encoder and every model
//! version ever trained:
//!
//! - a schema feature the row does not carry is filled with `0.0`;
//! - a row feature the schema does not name is dropped;
//! - the output always has the schema's length and order.
//!
//! A mismatch between row and schema is never an error. Trained models gain
//! and lose features over time while the encoder may emit a superset or a
//! subset of them, and the zero-fill/drop policy is what keeps those models
//! usable.

use crate::encode::EncodedRow;
use ahash::AHashMap;

/// An encoded row laid out in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRow<'a> {
    schema: &'a [String],
    values: Vec<f64>,
}

impl<'a> AlignedRow<'a> {
    pub fn schema(&self) -> &'a [String] {
        self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Value of a schema feature; `None` if `name` is not part of the schema.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema
            .iter()
            .position(|feature| feature == name)
            .map(|index| self.values[index])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Aligns `row` to `schema`. Total: never fails for any row/schema pair.
pub fn align<'a>(row: &EncodedRow, schema: &'a [String]) -> AlignedRow<'a> {
    let lookup: AHashMap<&str, f64> = row
        .features()
        .iter()
        .map(|feature| (feature.name.as_str(), feature.value))
        .collect();

    let values = schema
        .iter()
        .map(|name| lookup.get(name.as_str()).copied().unwrap_or(0.0))
        .collect();

    AlignedRow { schema, values }
}

/// Writes the aligned values of `row` straight into `out`, which must have
/// the schema's length. Used when filling a feature matrix row by row.
pub fn align_into(row: &EncodedRow, schema: &[String], out: &mut [f64]) {
    debug_assert_eq!(out.len(), schema.len());
    for (slot, name) in out.iter_mut().zip(schema) {
        *slot = row.get(name).unwrap_or(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_features_are_zero_filled_in_schema_order() {
        let row = EncodedRow::from_pairs([("A", 1.0)]);
        let schema = schema(&["A", "B", "C"]);
        let aligned = align(&row, &schema);
        assert_eq!(aligned.values(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn extra_features_are_dropped() {
        let row = EncodedRow::from_pairs([("A", 1.0), ("foo", 7.0), ("B", 1.0)]);
        let schema = schema(&["B", "A"]);
        let aligned = align(&row, &schema);

        assert_eq!(aligned.values(), &[1.0, 1.0]);
        assert_eq!(aligned.get("foo"), None);
        assert!(aligned.schema().iter().all(|name| name != "foo"));
    }

    #[test]
    fn empty_schema_yields_empty_row() {
        let row = EncodedRow::from_pairs([("A", 1.0)]);
        let aligned = align(&row, &[]);
        assert!(aligned.is_empty());
    }

    #[test]
    fn disjoint_schema_yields_all_zeros() {
        let row = EncodedRow::from_pairs([("A", 1.0), ("B", 1.0)]);
        let schema = schema(&["X", "Y", "Z"]);
        let aligned = align(&row, &schema);
        assert_eq!(aligned.len(), 3);
        assert!(aligned.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn identical_schema_reproduces_row_values() {
        let row = EncodedRow::from_pairs([("A", 1.0), ("B", 0.0), ("C", 37.0)]);
        let schema: Vec<String> = row.names().map(str::to_string).collect();
        let aligned = align(&row, &schema);
        assert_eq!(aligned.values(), &[1.0, 0.0, 37.0]);
    }

    #[test]
    fn empty_row_against_schema_is_all_zero() {
        let row = EncodedRow::default();
        let schema = schema(&["A", "B"]);
        assert_eq!(align(&row, &schema).into_values(), vec![0.0, 0.0]);
    }

    #[test]
    fn align_into_matches_align() {
        let row = EncodedRow::from_pairs([("C", 1.0), ("A", 5.0), ("foo", 2.0)]);
        let schema = schema(&["A", "B", "C"]);
        let mut buffer = vec![f64::NAN; 3];
        align_into(&row, &schema, &mut buffer);
        assert_eq!(buffer, align(&row, &schema).into_values());
    }
}
