//! # Survey Dataset Loading
//!
//! Reads the historical survey CSV and turns each usable row into a
//! [`TrainingExample`]. This is the exclusive entry point for training data.
//!
//! - Strict columns: the factor columns required by the encoding variant and
//!   the `treatment` outcome must all be present. Extra columns are ignored.
//! - Drop, don't impute: a row with a missing or unparseable required value
//!   is dropped and counted. An empty result is an error.
//! - Text in, text out: every column is read as text so that the shared
//!   encoder, not the CSV parser, decides what a value means.

use crate::encode::{
    AnswerValue, DAY_COUNT_FACTOR, EncodingVariant, FactorKind, MAX_DAYS_INDOORS, OUTCOME_COLUMN,
    RawAnswer,
};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// One historical survey row with its outcome label.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub answer: RawAnswer,
    /// Whether the respondent sought treatment (the positive class).
    pub treated: bool,
}

/// Examples read from a dataset file, with the number of rows dropped.
#[derive(Debug)]
pub struct LoadedDataset {
    pub examples: Vec<TrainingExample>,
    pub dropped_rows: usize,
}

#[derive(Error, Debug)]
pub enum TrainingDataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "No usable rows remain after dropping {dropped} rows with missing or invalid values."
    )]
    EmptyAfterFiltering { dropped: usize },
    #[error("The training split contains only one outcome class; both are required to fit.")]
    SingleClass,
}

/// Survey bucket labels for `Days_Indoors` with the inclusive day range each covers.
const DAY_BUCKETS: [(&str, i64, i64); 5] = [
    ("Go out Every day", 0, 0),
    ("1-14 days", 1, 14),
    ("15-30 days", 15, 30),
    ("31-60 days", 31, 60),
    ("More than 2 months", 61, MAX_DAYS_INDOORS),
];

/// Parses a day-count cell for `variant`.
///
/// A whole number in range is taken as is. A survey bucket label is accepted
/// only when every day it covers encodes to the same feature value under
/// `variant`, and is then read as its upper bound. A bucket that straddles
/// the variant's encoding (e.g. "31-60 days" against the 45-day threshold)
/// yields `None`, so the row is dropped instead of guessed.
pub fn parse_day_count(text: &str, variant: EncodingVariant) -> Option<i64> {
    let text = text.trim();
    if let Ok(days) = text.parse::<i64>() {
        return (0..=MAX_DAYS_INDOORS).contains(&days).then_some(days);
    }
    DAY_BUCKETS
        .iter()
        .find(|(label, _, _)| label.eq_ignore_ascii_case(text))
        .filter(|(_, low, high)| variant.encode_days(*low) == variant.encode_days(*high))
        .map(|(_, _, high)| *high)
}

fn parse_outcome(text: &str) -> Option<bool> {
    match text.trim() {
        "Yes" => Some(true),
        "No" => Some(false),
        _ => None,
    }
}

/// Loads the survey CSV at `path` for the given encoding variant.
pub fn load_training_examples(
    path: &Path,
    variant: EncodingVariant,
) -> Result<LoadedDataset, TrainingDataError> {
    log::info!("Loading survey data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0)),
        )
        .finish()?;

    let columns: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let factors: Vec<_> = variant.required_factors().collect();
    for name in factors
        .iter()
        .map(|f| f.name)
        .chain(std::iter::once(OUTCOME_COLUMN))
    {
        if !columns.contains(name) {
            return Err(TrainingDataError::ColumnNotFound(name.to_string()));
        }
    }

    let outcome = df.column(OUTCOME_COLUMN)?.as_materialized_series().str()?.clone();
    let mut factor_columns = Vec::with_capacity(factors.len());
    for factor in &factors {
        let values = df.column(factor.name)?.as_materialized_series().str()?.clone();
        factor_columns.push((*factor, values));
    }

    let mut examples = Vec::with_capacity(df.height());
    let mut dropped_rows = 0;
    'rows: for row in 0..df.height() {
        let Some(treated) = outcome.get(row).and_then(parse_outcome) else {
            dropped_rows += 1;
            continue;
        };

        let mut answer = RawAnswer::new();
        for (factor, values) in &factor_columns {
            let Some(text) = values.get(row).filter(|t| !t.trim().is_empty()) else {
                dropped_rows += 1;
                continue 'rows;
            };
            let value = match factor.kind {
                FactorKind::DayCount => match parse_day_count(text, variant) {
                    Some(days) => AnswerValue::Days(days),
                    None => {
                        dropped_rows += 1;
                        continue 'rows;
                    }
                },
                FactorKind::YesNo | FactorKind::Categorical => AnswerValue::from(text.trim()),
            };
            answer = answer.with(factor.name, value);
        }
        examples.push(TrainingExample { answer, treated });
    }

    log::info!(
        "Loaded {} usable rows, dropped {} rows with missing or unparseable values",
        examples.len(),
        dropped_rows
    );
    if !variant.includes_day_count() && columns.contains(DAY_COUNT_FACTOR) {
        log::debug!("Ignoring '{DAY_COUNT_FACTOR}' column for variant {variant}");
    }

    if examples.is_empty() {
        return Err(TrainingDataError::EmptyAfterFiltering {
            dropped: dropped_rows,
        });
    }

    Ok(LoadedDataset {
        examples,
        dropped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    const HEADER: &str = "Timestamp,Gender,family_history,Growing_Stress,Changes_Habits,Mood_Swings,Coping_Struggles,Work_Interest,Social_Weakness,treatment,self_employed,Days_Indoors,Mental_Health_History,mental_health_interview,care_options";

    fn create_test_csv(rows: &[&str]) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{HEADER}")?;
        for row in rows {
            writeln!(file, "{row}")?;
        }
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn parses_day_buckets_and_numbers() {
        let variant = EncodingVariant::ThresholdedDayCount;
        assert_eq!(parse_day_count("1-14 days", variant), Some(14));
        assert_eq!(parse_day_count("More than 2 months", variant), Some(90));
        assert_eq!(parse_day_count("Go out Every day", variant), Some(0));
        assert_eq!(parse_day_count(" 12 ", variant), Some(12));
        assert_eq!(parse_day_count("91", variant), None);
        assert_eq!(parse_day_count("sometimes", variant), None);
    }

    #[test]
    fn bucket_straddling_the_threshold_is_not_placed() {
        assert_eq!(
            parse_day_count("31-60 days", EncodingVariant::ThresholdedDayCount),
            None
        );
        assert_eq!(parse_day_count("45", EncodingVariant::ThresholdedDayCount), Some(45));
    }

    #[test]
    fn raw_variant_only_accepts_exact_day_counts() {
        let variant = EncodingVariant::RawDayCount;
        assert_eq!(parse_day_count("Go out Every day", variant), Some(0));
        assert_eq!(parse_day_count("1-14 days", variant), None);
        assert_eq!(parse_day_count("More than 2 months", variant), None);
        assert_eq!(parse_day_count("37", variant), Some(37));
    }

    #[test]
    fn rows_with_an_ambiguous_bucket_are_dropped() {
        let file = create_test_csv(&[
            "8/27/2014 11:29,Female,No,Yes,No,Medium,No,No,Yes,Yes,No,31-60 days,Yes,No,Not sure",
            "8/27/2014 11:30,Female,Yes,Yes,No,Medium,No,No,Yes,Yes,No,15-30 days,Yes,No,No",
        ])
        .unwrap();

        let loaded =
            load_training_examples(file.path(), EncodingVariant::ThresholdedDayCount).unwrap();
        assert_eq!(loaded.examples.len(), 1);
        assert_eq!(loaded.dropped_rows, 1);
        assert_eq!(
            loaded.examples[0].answer.get("Days_Indoors"),
            Some(&AnswerValue::Days(30))
        );
    }

    #[test]
    fn loads_rows_and_drops_incomplete_ones() {
        let file = create_test_csv(&[
            "8/27/2014 11:29,Female,No,Yes,No,Medium,No,No,Yes,Yes,No,1-14 days,Yes,No,Not sure",
            "8/27/2014 11:31,Female,Yes,Yes,No,Medium,No,No,Yes,Yes,,1-14 days,Yes,No,No",
            "8/27/2014 11:32,Female,Yes,Maybe,Yes,High,Yes,Maybe,No,No,Yes,More than 2 months,No,Maybe,Yes",
            "8/27/2014 11:33,Male,Yes,No,No,Low,No,Yes,No,Maybe,No,15-30 days,No,No,No",
        ])
        .unwrap();

        let loaded =
            load_training_examples(file.path(), EncodingVariant::ThresholdedDayCount).unwrap();

        assert_eq!(loaded.examples.len(), 2);
        assert_eq!(loaded.dropped_rows, 2);

        let first = &loaded.examples[0];
        assert!(first.treated);
        assert_eq!(first.answer.get("Days_Indoors"), Some(&AnswerValue::Days(14)));
        assert_eq!(
            first.answer.get("care_options"),
            Some(&AnswerValue::Text("Not sure".to_string()))
        );
        assert_eq!(first.answer.get("Gender"), None);

        let second = &loaded.examples[1];
        assert!(!second.treated);
        assert_eq!(second.answer.get("Days_Indoors"), Some(&AnswerValue::Days(90)));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "family_history,treatment").unwrap();
        writeln!(file, "Yes,No").unwrap();
        file.flush().unwrap();

        let err = load_training_examples(file.path(), EncodingVariant::default()).unwrap_err();
        match err {
            TrainingDataError::ColumnNotFound(col) => assert_eq!(col, "Growing_Stress"),
            other => panic!("Expected ColumnNotFound(Growing_Stress), got {other:?}"),
        }
    }

    #[test]
    fn all_rows_dropped_is_an_error() {
        let file = create_test_csv(&[
            "8/27/2014 11:29,Female,No,Yes,No,Medium,No,No,Yes,,No,1-14 days,Yes,No,Not sure",
        ])
        .unwrap();
        let err = load_training_examples(file.path(), EncodingVariant::default()).unwrap_err();
        assert!(matches!(
            err,
            TrainingDataError::EmptyAfterFiltering { dropped: 1 }
        ));
    }

    #[test]
    fn variant_without_day_count_does_not_need_the_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "family_history,Growing_Stress,Changes_Habits,Mood_Swings,Coping_Struggles,Work_Interest,Social_Weakness,treatment,self_employed,Mental_Health_History,mental_health_interview,care_options"
        )
        .unwrap();
        writeln!(file, "Yes,No,No,Low,No,Yes,No,Yes,No,No,No,No").unwrap();
        file.flush().unwrap();

        let loaded = load_training_examples(file.path(), EncodingVariant::WithoutDayCount).unwrap();
        assert_eq!(loaded.examples.len(), 1);
        assert_eq!(loaded.examples[0].answer.get("Days_Indoors"), None);
    }
}
