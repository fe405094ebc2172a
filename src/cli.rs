//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::inference::{Contract, CustomerInput, InternetService, PaymentMethod, YesNo};
use crate::model::{ForestParams, LogisticParams, ModelKind};
use crate::train::TrainingConfig;

/// Customer churn prediction: feature engineering, training and inference
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the engineered numeric table for a raw customer CSV
    Preprocess(PreprocessArgs),
    /// Train both classifiers and persist the artifact bundle
    Train(TrainArgs),
    /// Predict churn for one customer from persisted artifacts
    Predict(PredictArgs),
}

#[derive(clap::Args, Debug)]
pub struct PreprocessArgs {
    /// Path to the raw customer CSV
    #[arg(short, long, default_value = "customer_churn.csv")]
    pub input: PathBuf,

    /// Path of the engineered CSV to write
    #[arg(short, long, default_value = "preprocessed_data.csv")]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct TrainArgs {
    /// Path to the raw customer CSV
    #[arg(short, long, default_value = "customer_churn.csv")]
    pub input: PathBuf,

    /// Directory receiving the trained artifacts
    #[arg(short, long, default_value = "models")]
    pub model_dir: PathBuf,

    /// Seed for the stratified split and the forest
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Share of rows held out for evaluation
    #[arg(long, default_value = "0.2", value_parser = parse_test_size)]
    pub test_size: f64,

    /// Number of trees in the random forest
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    pub n_trees: u64,

    /// Maximum depth of each forest tree
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Maximum iterations for logistic regression
    #[arg(long, default_value = "1000")]
    pub max_iterations: u64,

    /// Only train the given model (repeatable); both by default
    #[arg(long = "model", value_enum)]
    pub models: Vec<ModelKind>,

    /// Write a chart of the churn-class scores to this PNG
    #[arg(long)]
    pub plot: Option<PathBuf>,
}

impl TrainArgs {
    pub fn to_config(&self) -> TrainingConfig {
        let models = if self.models.is_empty() {
            ModelKind::ALL.to_vec()
        } else {
            self.models.clone()
        };
        TrainingConfig {
            test_size: self.test_size,
            seed: self.seed,
            models,
            logistic: LogisticParams {
                max_iterations: self.max_iterations,
            },
            forest: ForestParams {
                n_trees: self.n_trees as usize,
                max_depth: self.max_depth,
                seed: self.seed,
                ..ForestParams::default()
            },
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct PredictArgs {
    /// Directory holding the trained artifacts
    #[arg(short, long, default_value = "models")]
    pub model_dir: PathBuf,

    /// Model used for the prediction
    #[arg(long, value_enum, default_value_t = ModelKind::LogisticRegression)]
    pub model: ModelKind,

    #[arg(long, default_value = "70", value_parser = parse_monthly_charges)]
    pub monthly_charges: f64,

    #[arg(long, default_value = "2000", value_parser = parse_total_charges)]
    pub total_charges: f64,

    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(0..=6))]
    pub num_additional_services: u8,

    #[arg(long, value_enum, default_value_t = Contract::MonthToMonth)]
    pub contract: Contract,

    #[arg(long, value_enum, default_value_t = InternetService::Dsl)]
    pub internet_service: InternetService,

    #[arg(long, value_enum, default_value_t = PaymentMethod::ElectronicCheck)]
    pub payment_method: PaymentMethod,

    #[arg(long, value_enum, default_value_t = YesNo::Yes)]
    pub paperless_billing: YesNo,

    #[arg(long, value_enum, default_value_t = YesNo::Yes)]
    pub partner: YesNo,

    #[arg(long, value_enum, default_value_t = YesNo::Yes)]
    pub dependents: YesNo,

    /// Months as a customer; enables the tenure-derived features
    #[arg(long, value_parser = parse_tenure)]
    pub tenure: Option<f64>,
}

impl PredictArgs {
    pub fn to_input(&self) -> CustomerInput {
        CustomerInput {
            monthly_charges: self.monthly_charges,
            total_charges: self.total_charges,
            num_additional_services: self.num_additional_services,
            contract: self.contract,
            internet_service: self.internet_service,
            payment_method: self.payment_method,
            paperless_billing: self.paperless_billing,
            partner: self.partner,
            dependents: self.dependents,
            tenure: self.tenure,
        }
    }
}

fn parse_in_range(value: &str, low: f64, high: f64) -> Result<f64, String> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if parsed < low || parsed > high {
        return Err(format!("{} is not in {}..={}", parsed, low, high));
    }
    Ok(parsed)
}

fn parse_monthly_charges(value: &str) -> Result<f64, String> {
    parse_in_range(value, 18.0, 120.0)
}

fn parse_total_charges(value: &str) -> Result<f64, String> {
    parse_in_range(value, 18.0, 9000.0)
}

fn parse_tenure(value: &str) -> Result<f64, String> {
    parse_in_range(value, 0.0, 72.0)
}

fn parse_test_size(value: &str) -> Result<f64, String> {
    let parsed = parse_in_range(value, 0.0, 1.0)?;
    if parsed == 0.0 || parsed == 1.0 {
        return Err(format!("{} must be strictly between 0 and 1", parsed));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_defaults_match_form() {
        let args = Args::try_parse_from(["churnforge", "predict"]).unwrap();
        let Command::Predict(predict) = args.command else {
            panic!("expected predict");
        };
        assert_eq!(predict.model, ModelKind::LogisticRegression);
        assert_eq!(predict.to_input(), CustomerInput::default());
    }

    #[test]
    fn test_predict_fixed_record() {
        let args = Args::try_parse_from([
            "churnforge",
            "predict",
            "--model",
            "random-forest",
            "--internet-service",
            "fiber-optic",
            "--partner",
            "no",
            "--dependents",
            "no",
            "--tenure",
            "5",
            "--verbose",
        ])
        .unwrap();
        assert!(args.verbose);
        let Command::Predict(predict) = args.command else {
            panic!("expected predict");
        };
        let input = predict.to_input();
        assert_eq!(predict.model, ModelKind::RandomForest);
        assert_eq!(input.internet_service, InternetService::FiberOptic);
        assert_eq!(input.partner, YesNo::No);
        assert_eq!(input.tenure, Some(5.0));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for extra in [
            ["--monthly-charges", "200"],
            ["--total-charges", "5"],
            ["--num-additional-services", "7"],
            ["--tenure", "73"],
            ["--contract", "weekly"],
        ] {
            let mut argv = vec!["churnforge", "predict"];
            argv.extend(extra);
            assert!(Args::try_parse_from(argv).is_err(), "{:?} accepted", extra);
        }
    }

    #[test]
    fn test_train_config() {
        let args = Args::try_parse_from([
            "churnforge",
            "train",
            "--input",
            "churn.csv",
            "--model-dir",
            "out",
            "--seed",
            "7",
            "--n-trees",
            "25",
            "--max-depth",
            "6",
        ])
        .unwrap();
        let Command::Train(train) = args.command else {
            panic!("expected train");
        };
        let config = train.to_config();
        assert_eq!(config.seed, 7);
        assert_eq!(config.test_size, 0.2);
        assert_eq!(config.models, ModelKind::ALL.to_vec());
        assert_eq!(config.forest.n_trees, 25);
        assert_eq!(config.forest.max_depth, Some(6));
        assert_eq!(config.forest.seed, 7);
        assert_eq!(config.logistic.max_iterations, 1000);
        assert_eq!(train.model_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_invalid_test_size() {
        for size in ["0", "1", "1.5", "abc"] {
            assert!(Args::try_parse_from(["churnforge", "train", "--test-size", size]).is_err());
        }
    }

    #[test]
    fn test_preprocess_paths() {
        let args =
            Args::try_parse_from(["churnforge", "preprocess", "-i", "raw.csv", "-o", "table.csv"])
                .unwrap();
        let Command::Preprocess(preprocess) = args.command else {
            panic!("expected preprocess");
        };
        assert_eq!(preprocess.input, PathBuf::from("raw.csv"));
        assert_eq!(preprocess.output, PathBuf::from("table.csv"));
    }
}
