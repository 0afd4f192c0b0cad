use mhrisk::align::align;
use mhrisk::artifact::{ModelArtifact, TrainingSummary};
use mhrisk::encode::{EncodedRow, EncodingVariant, FACTORS, FactorKind, RawAnswer, encode};
use mhrisk::session::{InferenceSession, RiskLabel, infer};
use mhrisk::train::calibration::{CalibratedForest, CalibrationMethod};
use mhrisk::train::config::TrainingConfig;
use mhrisk::train::data::{TrainingExample, load_training_examples};
use mhrisk::train::forest::ForestParams;
use mhrisk::train::matrix::{FeatureMatrix, encode_examples};
use mhrisk::train::metrics::ScoringMetric;
use mhrisk::train::pipeline::train;
use mhrisk::train::search::{HyperparamSearchSpace, NoopSearchProgress};
use ndarray::{Array1, Array2};
use std::fmt::Write as _;
use std::fs;
use tempfile::tempdir;

const HEADER: &str = "Timestamp,Gender,Country,Occupation,self_employed,family_history,treatment,Days_Indoors,Growing_Stress,Changes_Habits,Mental_Health_History,Mood_Swings,Coping_Struggles,Work_Interest,Social_Weakness,mental_health_interview,care_options";

/// Day-count cells for thresholded training: survey buckets that sit wholly on
/// one side of the threshold, plus a plain number.
const THRESHOLDED_DAY_CELLS: [&str; 5] = [
    "Go out Every day",
    "1-14 days",
    "15-30 days",
    "More than 2 months",
    "52",
];

/// Exact day counts, usable under every variant.
const NUMERIC_DAY_CELLS: [&str; 5] = ["0", "14", "30", "60", "90"];

/// Survey-shaped CSV whose outcome follows family history and coping struggles.
fn survey_csv(rows: usize, day_cells: &[&str; 5]) -> String {
    let three = ["Yes", "No", "Maybe"];
    let moods = ["Low", "Medium", "High"];
    let mut csv = String::new();
    writeln!(csv, "{HEADER}").unwrap();
    for i in 0..rows {
        let family = if i % 2 == 0 { "Yes" } else { "No" };
        let coping = if i % 5 == 0 { "Yes" } else { "No" };
        let treated = if i % 2 == 0 || i % 5 == 0 { "Yes" } else { "No" };
        // Every seventh row is missing self_employed and must be dropped.
        let self_employed = if i % 7 == 3 { "" } else if i % 3 == 0 { "Yes" } else { "No" };
        writeln!(
            csv,
            "8/27/2014 11:{:02},Female,United States,Corporate,{self_employed},{family},{treated},{},{},{},{},{},{coping},{},{},{},{}",
            i % 60,
            day_cells[i % 5],
            three[i % 3],
            three[(i + 1) % 3],
            three[(i + 2) % 3],
            moods[i % 3],
            three[i % 3],
            three[(i + 1) % 3],
            three[(i + 2) % 3],
            if i % 4 == 0 { "Not sure" } else { three[i % 2] },
        )
        .unwrap();
    }
    csv
}

fn quick_config(variant: EncodingVariant) -> TrainingConfig {
    TrainingConfig {
        variant,
        search: HyperparamSearchSpace {
            n_estimators: vec![15],
            max_depth: vec![4, 8],
            min_samples_split: vec![2],
            min_samples_leaf: vec![1],
            bootstrap: vec![true],
            max_samples: vec![1.0],
        },
        ..TrainingConfig::default()
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn complete_answer(family: &str, coping: &str, days: i64) -> RawAnswer {
    FACTORS
        .iter()
        .filter(|factor| factor.name != "mental_health_interview")
        .fold(RawAnswer::new(), |answer, factor| match factor.kind {
            FactorKind::DayCount => answer.with(factor.name, days),
            FactorKind::YesNo | FactorKind::Categorical => answer.with(factor.name, "No"),
        })
        .with("family_history", family)
        .with("Coping_Struggles", coping)
}

#[test]
fn csv_to_saved_model_to_assessment() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join("survey.csv");
    fs::write(&csv_path, survey_csv(140, &THRESHOLDED_DAY_CELLS)).unwrap();

    let config = quick_config(EncodingVariant::ThresholdedDayCount);
    let loaded = load_training_examples(&csv_path, config.variant).unwrap();
    assert_eq!(loaded.dropped_rows, 20);
    assert_eq!(loaded.examples.len(), 120);

    let outcome = train(&loaded.examples, &config, &mut NoopSearchProgress).unwrap();
    assert!(outcome.report.accuracy > 0.8);

    let model_path = dir.path().join("models").join("model.toml");
    outcome.artifact.save(&model_path).unwrap();
    let session = InferenceSession::load(&model_path).unwrap();
    assert_eq!(session.artifact(), &outcome.artifact);

    let high = session.assess(&complete_answer("Yes", "No", 10)).unwrap();
    assert_eq!(high.label, RiskLabel::High);
    let low = session.assess(&complete_answer("No", "No", 10)).unwrap();
    assert_eq!(low.label, RiskLabel::Low);
    for result in [high, low] {
        assert!(result.probability.is_finite());
        assert!((0.0..=1.0).contains(&result.probability));
    }
}

#[test]
fn probabilities_stay_in_bounds_for_sparse_and_unseen_answers() {
    let dataset: Vec<TrainingExample> = (0..80)
        .map(|i| TrainingExample {
            answer: complete_answer(
                if i % 2 == 0 { "Yes" } else { "No" },
                if i % 3 == 0 { "Yes" } else { "No" },
                (i * 7 % 91) as i64,
            ),
            treated: i % 2 == 0,
        })
        .collect();
    let outcome = train(
        &dataset,
        &quick_config(EncodingVariant::RawDayCount),
        &mut NoopSearchProgress,
    )
    .unwrap();

    let answers = [
        RawAnswer::new(),
        RawAnswer::new().with("Days_Indoors", 90),
        RawAnswer::new().with("Mood_Swings", "Never seen before"),
        complete_answer("Yes", "Yes", 0),
    ];
    for answer in &answers {
        let result = infer(answer, &outcome.artifact).unwrap();
        assert!((0.0..=1.0).contains(&result.probability));
        assert_eq!(result.label == RiskLabel::High, result.probability > 0.5);
    }
}

#[test]
fn extra_feature_is_dropped_without_disturbing_the_rest() {
    let schema = names(&["A", "B", "C"]);
    let with_extra = EncodedRow::from_pairs([("A", 1.0), ("foo", 7.0), ("C", 1.0)]);
    let without_extra = EncodedRow::from_pairs([("A", 1.0), ("C", 1.0)]);

    let aligned = align(&with_extra, &schema);
    assert_eq!(aligned.get("foo"), None);
    assert_eq!(aligned.values(), align(&without_extra, &schema).values());
}

#[test]
fn sparse_row_is_zero_filled_in_schema_order() {
    let schema = names(&["A", "B", "C"]);
    let aligned = align(&EncodedRow::from_pairs([("A", 1.0)]), &schema);
    assert_eq!(aligned.values(), &[1.0, 0.0, 0.0]);
}

#[test]
fn model_without_day_count_ignores_a_supplied_day_count() {
    let dataset: Vec<TrainingExample> = (0..60)
        .map(|i| TrainingExample {
            answer: complete_answer(if i % 2 == 0 { "Yes" } else { "No" }, "No", 30),
            treated: i % 2 == 0,
        })
        .collect();
    let outcome = train(
        &dataset,
        &quick_config(EncodingVariant::WithoutDayCount),
        &mut NoopSearchProgress,
    )
    .unwrap();
    let artifact = outcome.artifact;
    assert!(artifact.feature_schema().iter().all(|name| name != "Days_Indoors"));

    let short = infer(&complete_answer("Yes", "No", 0), &artifact).unwrap();
    let long = infer(&complete_answer("Yes", "No", 90), &artifact).unwrap();
    assert_eq!(short, long);
}

#[test]
fn older_model_with_fewer_features_still_scores_current_answers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.toml");
    let schema = names(&[
        "family_history",
        "Days_Indoors",
        "mental_health_interview_Yes",
    ]);
    let mut x = Array2::zeros((60, schema.len()));
    let mut y = Array1::zeros(60);
    for i in 0..60 {
        let family = if i % 2 == 0 { 1.0 } else { 0.0 };
        x[[i, 0]] = family;
        x[[i, 1]] = if i % 3 == 0 { 1.0 } else { 0.0 };
        x[[i, 2]] = 1.0;
        y[i] = family;
    }
    let params = ForestParams {
        n_estimators: 10,
        ..ForestParams::default()
    };
    let estimator = CalibratedForest::fit(
        x.view(),
        y.view(),
        &schema,
        &params,
        CalibrationMethod::Isotonic,
        3,
        5,
    )
    .unwrap();
    let summary = TrainingSummary {
        examples: 60,
        dropped_examples: 0,
        train_rows: 60,
        test_rows: 0,
        scoring: ScoringMetric::Accuracy,
        cv_score: 1.0,
        test_accuracy: 1.0,
        seed: 5,
        best_params: params,
    };
    ModelArtifact::new(EncodingVariant::ThresholdedDayCount, estimator, summary)
        .unwrap()
        .save(&path)
        .unwrap();

    let artifact = ModelArtifact::load(&path).unwrap();
    assert_eq!(artifact.feature_schema(), schema.as_slice());

    let high = infer(&complete_answer("Yes", "Yes", 60), &artifact).unwrap();
    assert_eq!(high.label, RiskLabel::High);
    let low = infer(&complete_answer("No", "Yes", 60), &artifact).unwrap();
    assert_eq!(low.label, RiskLabel::Low);
}

#[test]
fn aligning_the_training_rows_reproduces_the_training_matrix() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join("survey.csv");
    fs::write(&csv_path, survey_csv(90, &NUMERIC_DAY_CELLS)).unwrap();
    let config = quick_config(EncodingVariant::RawDayCount);
    let loaded = load_training_examples(&csv_path, config.variant).unwrap();

    let outcome = train(&loaded.examples, &config, &mut NoopSearchProgress).unwrap();
    let encoded = encode_examples(&loaded.examples, outcome.artifact.variant());
    let matrix = FeatureMatrix::from_encoded(&encoded);

    assert_eq!(outcome.artifact.feature_schema(), matrix.schema.as_slice());
    for (example, expected) in loaded.examples.iter().zip(matrix.x.rows()) {
        let row = encode(&example.answer, outcome.artifact.variant()).unwrap();
        let aligned = align(&row, outcome.artifact.feature_schema());
        assert_eq!(aligned.values(), expected.to_vec().as_slice());
    }
}
