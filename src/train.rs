//! Training pipeline: split, scale, fit, evaluate and persist

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::{Manifest, TrainingArtifacts};
use crate::data::{load_training_table, TrainingTable};
use crate::error::ChurnError;
use crate::metrics::ClassificationReport;
use crate::model::{fit_model, ForestParams, LogisticParams, ModelKind, CHURN, STAY};
use crate::scaler::StandardScaler;
use crate::split::train_test_split;

/// Knobs of one retrain cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Share of rows held out for evaluation.
    pub test_size: f64,
    /// Seed of the stratified split.
    pub seed: u64,
    pub models: Vec<ModelKind>,
    pub logistic: LogisticParams,
    pub forest: ForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            models: ModelKind::ALL.to_vec(),
            logistic: LogisticParams::default(),
            forest: ForestParams::default(),
        }
    }
}

/// Test-partition scores of one fitted model.
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    pub kind: ModelKind,
    pub report: ClassificationReport,
}

/// Outcome of a completed retrain cycle.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub train_rows: usize,
    pub test_rows: usize,
    pub n_features: usize,
    pub evaluations: Vec<ModelEvaluation>,
    pub written: Vec<PathBuf>,
}

/// Run the full pipeline on a raw customer CSV.
pub fn train(
    dataset_path: &Path,
    model_dir: &Path,
    config: &TrainingConfig,
) -> crate::Result<TrainingSummary> {
    info!(dataset = %dataset_path.display(), "Starting model training");
    let table = load_training_table(dataset_path)?;
    train_on_table(&table, model_dir, config)
}

/// Train every configured model on an encoded table and persist the bundle.
///
/// Nothing is written until every model has been fitted and evaluated.
pub fn train_on_table(
    table: &TrainingTable,
    model_dir: &Path,
    config: &TrainingConfig,
) -> crate::Result<TrainingSummary> {
    let mut kinds = config.models.clone();
    kinds.sort();
    kinds.dedup();
    if kinds.is_empty() {
        return Err(ChurnError::MalformedInput(
            "no models selected for training".to_string(),
        ));
    }
    for class in [STAY, CHURN] {
        if !table.targets.iter().any(|&t| t == class) {
            return Err(ChurnError::MalformedInput(format!(
                "training data has no rows of class {}",
                class
            )));
        }
    }

    let split = train_test_split(&table.features, &table.targets, config.test_size, config.seed)?;
    info!(
        train_rows = split.train_targets.len(),
        test_rows = split.test_targets.len(),
        churn_rate = table.churn_rate(),
        "Split data"
    );

    let scaler = StandardScaler::fit(&split.train_features)?;
    let train_scaled = scaler.transform(&split.train_features)?;
    let test_scaled = scaler.transform(&split.test_features)?;
    let truth = split.test_targets.to_vec();

    let mut models = Vec::with_capacity(kinds.len());
    let mut evaluations = Vec::with_capacity(kinds.len());
    for &kind in &kinds {
        info!(model = %kind, "Training and evaluating");
        let model = fit_model(
            kind,
            &train_scaled,
            &split.train_targets,
            &config.logistic,
            &config.forest,
        )?;
        let predicted = model.predict(&test_scaled)?;
        let report = ClassificationReport::binary(&truth, &predicted.to_vec());
        info!(model = %kind, accuracy = report.accuracy, "Evaluated on test partition");
        evaluations.push(ModelEvaluation { kind, report });
        models.push(model);
    }

    let manifest = Manifest {
        trained_at: Utc::now(),
        config: config.clone(),
        train_rows: split.train_targets.len(),
        test_rows: split.test_targets.len(),
        n_features: table.schema.len(),
        models: kinds,
        digests: BTreeMap::new(),
    };
    let artifacts = TrainingArtifacts {
        schema: table.schema.clone(),
        scaler,
        params: table.params.clone(),
        models,
        manifest,
    };
    let written = artifacts.save(model_dir)?;

    Ok(TrainingSummary {
        train_rows: artifacts.manifest.train_rows,
        test_rows: artifacts.manifest.test_rows,
        n_features: table.schema.len(),
        evaluations,
        written,
    })
}
