#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use mhrisk::artifact::{DEFAULT_MODEL_PATH, ModelArtifact};
use mhrisk::encode::{EncodingVariant, FACTORS, FactorKind, RawAnswer};
use mhrisk::session::{InferenceSession, RiskHistory};
use mhrisk::train::config::TrainingConfig;
use mhrisk::train::data::load_training_examples;
use mhrisk::train::pipeline::{evaluate, train};
use mhrisk::train::search::{SearchProgressObserver, SearchStage};

#[derive(Clone, Copy, ValueEnum)]
pub enum VariantCli {
    /// Days indoors as a raw count
    Raw,
    /// Days indoors as a flag for more than 45 days
    Thresholded,
    /// No days-indoors feature
    Without,
}

impl From<VariantCli> for EncodingVariant {
    fn from(value: VariantCli) -> Self {
        match value {
            VariantCli::Raw => EncodingVariant::RawDayCount,
            VariantCli::Thresholded => EncodingVariant::ThresholdedDayCount,
            VariantCli::Without => EncodingVariant::WithoutDayCount,
        }
    }
}

#[derive(Args)]
pub struct TrainArgs {
    /// Path to the survey CSV with the factor columns and a treatment column
    pub dataset: PathBuf,

    /// TOML file overriding the default training configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to write the trained model (overrides the configuration)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Encoding of the days-indoors factor (overrides the configuration)
    #[arg(long, value_enum)]
    pub variant: Option<VariantCli>,

    /// Seed for splits, folds and tree sampling (overrides the configuration)
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args)]
pub struct InferArgs {
    /// One or more TOML answer files, e.g. `family_history = "Yes"`
    #[arg(required = true)]
    pub answers: Vec<PathBuf>,

    /// Path to trained model file (.toml)
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,

    /// Print the numbered probability history after scoring all files
    #[arg(long)]
    pub history: bool,
}

#[derive(Args)]
pub struct EvaluateArgs {
    /// Path to the survey CSV to evaluate on
    pub dataset: PathBuf,

    /// Path to trained model file (.toml)
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,

    /// TOML file supplying the hold-out fraction and seed
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Also print the feature schema recorded in this model file
    #[arg(long)]
    pub model: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "mhrisk",
    about = "Mental-health risk model training and assessment",
    long_about = "Trains a calibrated random forest on survey data and scores questionnaire \
                 answers against a saved model, aligning every answer to the feature schema \
                 the model was trained on."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and save it as TOML
    Train(TrainArgs),
    /// Score questionnaire answers with a saved model
    Infer(InferArgs),
    /// Report hold-out accuracy of a saved model on a dataset
    Evaluate(EvaluateArgs),
    /// List the questionnaire factors and, optionally, a model's schema
    Schema(SchemaArgs),
}

/// Shows grid-search progress on stderr when it is a terminal.
struct SearchProgressBar {
    bar: Option<ProgressBar>,
}

impl SearchProgressBar {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl SearchProgressObserver for SearchProgressBar {
    fn on_stage_start(&mut self, stage: SearchStage, total_fits: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_fits as u64), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(stage.describe());
        self.bar = Some(bar);
    }

    fn on_stage_advance(&mut self, stage: SearchStage, completed_fits: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(completed_fits as u64);
            bar.set_message(stage.describe());
        }
    }

    fn on_stage_finish(&mut self, stage: SearchStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TrainingConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => {
            println!("Loading training configuration from: {}", path.display());
            TrainingConfig::load(path)?
        }
        None => TrainingConfig::default(),
    })
}

pub fn run_train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(variant) = args.variant {
        config.variant = variant.into();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    println!("Encoding variant: {}", config.variant);

    println!("Loading training data from: {}", args.dataset.display());
    let loaded = load_training_examples(&args.dataset, config.variant)?;
    println!(
        "Loaded {} usable rows ({} dropped for missing or invalid values)",
        loaded.examples.len(),
        loaded.dropped_rows
    );

    println!(
        "Searching {} parameter combinations with {}-fold cross-validation...",
        config.search.candidates().len(),
        config.cv_folds
    );
    let mut progress = SearchProgressBar::new();
    let outcome = train(&loaded.examples, &config, &mut progress)?;

    let best = &outcome.search.best;
    println!("Best parameters: {:?}", best.params);
    println!("Best cross-validated {}: {:.4}", config.scoring, best.mean_score);
    println!("Accuracy: {:.4}", outcome.report.accuracy);
    println!("\nClassification Report:\n{}", outcome.report);

    outcome.artifact.save(&config.output)?;
    println!(
        "Model with {} features saved to: {}",
        outcome.artifact.feature_schema().len(),
        config.output.display()
    );
    Ok(())
}

pub fn run_infer(args: InferArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let session = InferenceSession::load(&args.model)?;
    println!(
        "Model expects {} features encoded as {}",
        session.artifact().feature_schema().len(),
        session.artifact().variant()
    );

    let mut history = RiskHistory::new();
    for path in &args.answers {
        let answer: RawAnswer = toml::from_str(&fs::read_to_string(path)?)?;
        let result = session.assess(&answer)?;
        println!(
            "{}: {} risk ({:.1}%)",
            path.display(),
            result.label,
            result.probability * 100.0
        );
        history.record(&result);
    }

    if args.history {
        println!("\nPrediction history:");
        for (number, probability) in history.points() {
            println!("  #{number}: {:.1}%", probability * 100.0);
        }
    }
    Ok(())
}

pub fn run_evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;
    println!("Loading model from: {}", args.model.display());
    let artifact = ModelArtifact::load(&args.model)?;

    println!("Loading evaluation data from: {}", args.dataset.display());
    let loaded = load_training_examples(&args.dataset, artifact.variant())?;
    let evaluation = evaluate(&artifact, &loaded.examples, &config)?;

    println!(
        "Evaluated on {} held-out rows ({} dropped)",
        evaluation.test_rows,
        loaded.dropped_rows + evaluation.dropped_examples
    );
    println!("Accuracy: {:.4}", evaluation.report.accuracy);
    println!("\nClassification Report:\n{}", evaluation.report);
    Ok(())
}

pub fn run_schema(args: SchemaArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Questionnaire factors:");
    for factor in &FACTORS {
        let kind = match factor.kind {
            FactorKind::YesNo => "yes/no",
            FactorKind::Categorical => "categorical",
            FactorKind::DayCount => "day count",
        };
        println!("  {:<24} {:<12} {}", factor.name, kind, factor.prompt);
    }

    if let Some(path) = args.model {
        let artifact = ModelArtifact::load(&path)?;
        println!(
            "\nModel {} (variant {}), {} features in training order:",
            path.display(),
            artifact.variant(),
            artifact.feature_schema().len()
        );
        for (index, name) in artifact.feature_schema().iter().enumerate() {
            println!("  {:>3}  {name}", index + 1);
        }
        for (factor, value) in artifact.variant().injected_defaults() {
            println!("Injected when absent: {factor} = \"{value}\"");
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Train(args)) => run_train(args),
        Some(Commands::Infer(args)) => run_infer(args),
        Some(Commands::Evaluate(args)) => run_evaluate(args),
        Some(Commands::Schema(args)) => run_schema(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
