//! ChurnForge: customer churn prediction CLI
//!
//! Entry point that dispatches preprocessing, training and single-customer
//! prediction.

use anyhow::{Context, Result};
use churnforge::cli::{PredictArgs, PreprocessArgs, TrainArgs};
use churnforge::{
    inference, load_training_table, logging, train, viz, write_training_table, Args, ChurnError,
    Command,
};
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match &args.command {
        Command::Preprocess(preprocess) => run_preprocess(preprocess, args.verbose),
        Command::Train(train_args) => run_train(train_args, args.verbose),
        Command::Predict(predict) => run_predict(predict, args.verbose),
    }
}

/// Write the engineered table for a raw customer file
fn run_preprocess(args: &PreprocessArgs, verbose: bool) -> Result<()> {
    println!("=== Preprocessing ===");
    let start_time = Instant::now();

    let table = load_training_table(&args.input)
        .with_context(|| format!("failed to preprocess {}", args.input.display()))?;
    write_training_table(&table, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!(
        "✓ Engineered {} customers into {} columns",
        table.n_rows(),
        table.schema.len()
    );
    println!("  Churn rate: {:.1}%", table.churn_rate() * 100.0);
    if verbose {
        println!(
            "  High-charge threshold: {:.2}",
            table.params.high_charge_threshold
        );
        println!("  Columns: {}", table.schema.columns().join(", "));
    }
    println!("  Output: {}", args.output.display());
    println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Train, evaluate and persist both classifiers
fn run_train(args: &TrainArgs, verbose: bool) -> Result<()> {
    println!("=== Training Pipeline ===\n");
    let config = args.to_config();
    if verbose {
        println!("Input file: {}", args.input.display());
        println!("Model directory: {}", args.model_dir.display());
        println!(
            "Seed: {}, test size: {}, trees: {}, max iterations: {}",
            config.seed, config.test_size, config.forest.n_trees, config.logistic.max_iterations
        );
    }

    let start_time = Instant::now();
    let summary = train(&args.input, &args.model_dir, &config).context("training failed")?;

    println!(
        "✓ Trained on {} customers, evaluated on {} ({} features)",
        summary.train_rows, summary.test_rows, summary.n_features
    );
    for evaluation in &summary.evaluations {
        println!("\n--- {} ---", evaluation.kind.display_name());
        println!("Classification Report:");
        println!("{}", evaluation.report);
    }

    if let Some(plot) = &args.plot {
        viz::create_evaluation_chart(&summary.evaluations, plot)
            .with_context(|| format!("failed to draw {}", plot.display()))?;
        println!("✓ Evaluation chart saved to: {}", plot.display());
    }

    println!("\n=== Training Complete ===");
    for path in &summary.written {
        println!("  Saved {}", path.display());
    }
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Predict churn for one customer
fn run_predict(args: &PredictArgs, verbose: bool) -> Result<()> {
    println!("=== Churn Prediction ===");
    let input = args.to_input();
    if verbose {
        println!("Model: {}", args.model);
        println!("Input: {:?}", input);
    }

    let start_time = Instant::now();
    let service = match inference::init(&args.model_dir, args.model) {
        Ok(service) => service,
        Err(err @ ChurnError::MissingArtifact { .. }) => {
            println!("\nModel artifacts are not available. Please retrain the model first.");
            return Err(err).context("cannot start the prediction service");
        }
        Err(err) => return Err(err).context("cannot start the prediction service"),
    };

    let prediction = service.predict(&input).context("prediction failed")?;
    println!("\n{}", prediction);
    if verbose {
        println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    }
    Ok(())
}
