//! # Questionnaire Feature Encoding
//!
//! This module is the single place where raw questionnaire answers are turned
//! into named numeric features. Training and inference both call [`encode`],
//! so the two sides cannot drift apart in how a given factor is represented.
//!
//! - Fixed catalog: the factor names are the column names of the survey
//!   dataset. They are not configurable.
//! - Versioned output: historical models were trained on slightly different
//!   encodings of the day-count factor. The [`EncodingVariant`] selects which
//!   one is produced, and every persisted model pins the variant it was fit on.
//! - Pure: no global state, no randomness. The same answer and variant always
//!   produce the same [`EncodedRow`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Dataset column holding the binary outcome label.
pub const OUTCOME_COLUMN: &str = "treatment";

/// The only ordinal factor in the questionnaire.
pub const DAY_COUNT_FACTOR: &str = "Days_Indoors";

/// Factor that is present in the survey data but never asked of the user.
pub const INTERVIEW_FACTOR: &str = "mental_health_interview";

/// Upper bound (inclusive) of the day-count answer.
pub const MAX_DAYS_INDOORS: i64 = 90;

/// Day counts strictly above this value encode to `1` under the thresholded variant.
pub const DAYS_INDOORS_THRESHOLD: i64 = 45;

/// How a factor's answer is represented in the feature row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorKind {
    /// "Yes" / "No" mapped to 1 / 0.
    YesNo,
    /// Open set of labels, expanded one-hot as `<factor>_<label>`.
    Categorical,
    /// Integer number of days in `0..=MAX_DAYS_INDOORS`.
    DayCount,
}

/// One questionnaire factor.
#[derive(Debug, Clone, Copy)]
pub struct Factor {
    pub name: &'static str,
    pub kind: FactorKind,
    pub prompt: &'static str,
}

/// The questionnaire, in canonical emission order.
pub const FACTORS: [Factor; 12] = [
    Factor {
        name: "family_history",
        kind: FactorKind::YesNo,
        prompt: "Family history of mental illness?",
    },
    Factor {
        name: "Growing_Stress",
        kind: FactorKind::Categorical,
        prompt: "Growing stress?",
    },
    Factor {
        name: "Changes_Habits",
        kind: FactorKind::Categorical,
        prompt: "Changes in habits?",
    },
    Factor {
        name: "Mood_Swings",
        kind: FactorKind::Categorical,
        prompt: "Mood swings?",
    },
    Factor {
        name: "Coping_Struggles",
        kind: FactorKind::YesNo,
        prompt: "Coping struggles?",
    },
    Factor {
        name: "Work_Interest",
        kind: FactorKind::Categorical,
        prompt: "Interest in work?",
    },
    Factor {
        name: "Social_Weakness",
        kind: FactorKind::Categorical,
        prompt: "Social weakness?",
    },
    Factor {
        name: "self_employed",
        kind: FactorKind::YesNo,
        prompt: "Self employed?",
    },
    Factor {
        name: DAY_COUNT_FACTOR,
        kind: FactorKind::DayCount,
        prompt: "Days spent indoors (0-90)",
    },
    Factor {
        name: "Mental_Health_History",
        kind: FactorKind::Categorical,
        prompt: "Mental health history?",
    },
    Factor {
        name: INTERVIEW_FACTOR,
        kind: FactorKind::Categorical,
        prompt: "Willing to discuss mental health in an interview? (not asked)",
    },
    Factor {
        name: "care_options",
        kind: FactorKind::Categorical,
        prompt: "Care options available?",
    },
];

/// Looks up a factor of the questionnaire by its exact name.
pub fn factor(name: &str) -> Option<&'static Factor> {
    FACTORS.iter().find(|f| f.name == name)
}

/// A single answer value as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Days(i64),
    Text(String),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Days(days) => write!(f, "{days}"),
            AnswerValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Days(value)
    }
}

/// One submitted questionnaire, keyed by factor name.
///
/// Built once and then only read. Serializes as a flat table, so an answers
/// file looks like `family_history = "Yes"` / `Days_Indoors = 30`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAnswer {
    values: BTreeMap<String, AnswerValue>,
}

impl RawAnswer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the answer with `factor` set to `value`.
    pub fn with(mut self, factor: impl Into<String>, value: impl Into<AnswerValue>) -> Self {
        self.values.insert(factor.into(), value.into());
        self
    }

    pub fn get(&self, factor: &str) -> Option<&AnswerValue> {
        self.values.get(factor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnswerValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, AnswerValue)> for RawAnswer {
    fn from_iter<T: IntoIterator<Item = (String, AnswerValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Which encoding of the questionnaire a model was trained on.
///
/// All variants inject `mental_health_interview = "Yes"` when the answer does
/// not carry that factor, because the questionnaire never asks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingVariant {
    /// `Days_Indoors` is emitted as the raw number of days.
    RawDayCount,
    /// `Days_Indoors` is emitted as `1` when the count exceeds 45, else `0`.
    #[default]
    ThresholdedDayCount,
    /// `Days_Indoors` is not emitted at all.
    WithoutDayCount,
}

const INJECTED_DEFAULTS: [(&str, &str); 1] = [(INTERVIEW_FACTOR, "Yes")];

impl EncodingVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawDayCount => "raw_day_count",
            Self::ThresholdedDayCount => "thresholded_day_count",
            Self::WithoutDayCount => "without_day_count",
        }
    }

    pub fn includes_day_count(self) -> bool {
        !matches!(self, Self::WithoutDayCount)
    }

    /// Factor values filled in when the answer does not supply them.
    pub fn injected_defaults(self) -> &'static [(&'static str, &'static str)] {
        &INJECTED_DEFAULTS
    }

    /// Factors a dataset row must carry to be encodable under this variant.
    pub fn required_factors(self) -> impl Iterator<Item = &'static Factor> {
        FACTORS
            .iter()
            .filter(move |f| f.kind != FactorKind::DayCount || self.includes_day_count())
    }

    /// First required factor that `raw` leaves unanswered. Factors with an
    /// injected default never count as missing.
    pub fn missing_factor(self, raw: &RawAnswer) -> Option<&'static str> {
        self.required_factors()
            .map(|f| f.name)
            .find(|name| raw.get(name).is_none() && self.injected_default(name).is_none())
    }

    fn injected_default(self, factor: &str) -> Option<&'static str> {
        self.injected_defaults()
            .iter()
            .find(|(name, _)| *name == factor)
            .map(|(_, value)| *value)
    }

    /// Feature value of a day count under this variant; `None` when the
    /// variant does not emit the day-count feature.
    pub fn encode_days(self, days: i64) -> Option<f64> {
        match self {
            Self::RawDayCount => Some(days as f64),
            Self::ThresholdedDayCount => Some(if days > DAYS_INDOORS_THRESHOLD {
                1.0
            } else {
                0.0
            }),
            Self::WithoutDayCount => None,
        }
    }
}

impl fmt::Display for EncodingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an encoded feature came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureKind {
    Binary,
    DayCount,
    Indicator { factor: String, category: String },
    /// Built directly from name/value pairs rather than by the encoder.
    Unclassified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFeature {
    pub name: String,
    pub value: f64,
    pub kind: FeatureKind,
}

/// Named feature values in canonical emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedRow {
    features: Vec<EncodedFeature>,
}

impl EncodedRow {
    /// Builds a row from plain pairs. A repeated name keeps its last value.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut row = Self::default();
        for (name, value) in pairs {
            row.push(name.into(), value, FeatureKind::Unclassified);
        }
        row
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|feature| feature.name == name)
            .map(|feature| feature.value)
    }

    pub fn features(&self) -> &[EncodedFeature] {
        &self.features
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|feature| feature.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn push(&mut self, name: String, value: f64, kind: FeatureKind) {
        match self.features.iter_mut().find(|feature| feature.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.kind = kind;
            }
            None => self.features.push(EncodedFeature { name, value, kind }),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Invalid value '{value}' for factor '{field}': {reason}")]
    InvalidFieldValue {
        field: String,
        value: String,
        reason: &'static str,
    },
}

fn invalid(field: &str, value: &AnswerValue, reason: &'static str) -> EncodeError {
    EncodeError::InvalidFieldValue {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    }
}

/// Encodes one questionnaire answer under the given variant.
///
/// Factors absent from the answer produce no features (apart from injected
/// defaults); the schema aligner zero-fills them later.
pub fn encode(raw: &RawAnswer, variant: EncodingVariant) -> Result<EncodedRow, EncodeError> {
    if let Some((name, value)) = raw.iter().find(|(name, _)| factor(name).is_none()) {
        return Err(invalid(name, value, "not a questionnaire factor"));
    }

    let mut row = EncodedRow::default();
    for factor in &FACTORS {
        let value = match (raw.get(factor.name), variant.injected_default(factor.name)) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => AnswerValue::from(default),
            (None, None) => continue,
        };

        match factor.kind {
            FactorKind::YesNo => {
                let encoded = encode_yes_no(factor, &value)?;
                row.push(factor.name.to_string(), encoded, FeatureKind::Binary);
            }
            FactorKind::DayCount if !variant.includes_day_count() => {}
            FactorKind::DayCount => {
                let days = validate_days(factor, &value)?;
                if let Some(encoded) = variant.encode_days(days) {
                    row.push(factor.name.to_string(), encoded, FeatureKind::DayCount);
                }
            }
            FactorKind::Categorical => {
                let category = categorical_label(factor, &value)?;
                row.push(
                    indicator_name(factor.name, category),
                    1.0,
                    FeatureKind::Indicator {
                        factor: factor.name.to_string(),
                        category: category.to_string(),
                    },
                );
            }
        }
    }

    Ok(row)
}

/// Name of the one-hot indicator for `category` of a categorical factor.
pub fn indicator_name(factor: &str, category: &str) -> String {
    format!("{factor}_{category}")
}

fn encode_yes_no(factor: &Factor, value: &AnswerValue) -> Result<f64, EncodeError> {
    match value {
        AnswerValue::Text(text) => match text.trim() {
            "Yes" => Ok(1.0),
            "No" => Ok(0.0),
            _ => Err(invalid(factor.name, value, "expected \"Yes\" or \"No\"")),
        },
        AnswerValue::Days(_) => Err(invalid(factor.name, value, "expected \"Yes\" or \"No\"")),
    }
}

fn validate_days(factor: &Factor, value: &AnswerValue) -> Result<i64, EncodeError> {
    match value {
        AnswerValue::Days(days) if (0..=MAX_DAYS_INDOORS).contains(days) => Ok(*days),
        AnswerValue::Days(_) => Err(invalid(factor.name, value, "day count must be within 0..=90")),
        AnswerValue::Text(_) => Err(invalid(factor.name, value, "expected a whole number of days")),
    }
}

fn categorical_label<'a>(factor: &Factor, value: &'a AnswerValue) -> Result<&'a str, EncodeError> {
    match value {
        AnswerValue::Text(text) if !text.trim().is_empty() => Ok(text.trim()),
        _ => Err(invalid(factor.name, value, "expected a non-empty category label")),
    }
}
