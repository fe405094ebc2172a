//! Churn classifiers: logistic regression and a bagged decision-tree forest

use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChurnError;
use crate::tree::{ClassificationTree, TreeParams};

/// Class label for a customer who stays.
pub const STAY: usize = 0;
/// Class label for a customer who churns.
pub const CHURN: usize = 1;

/// Candidate classifier families; each one persists under its own name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    RandomForest,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::LogisticRegression, ModelKind::RandomForest];

    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "Logistic Regression",
            ModelKind::RandomForest => "Random Forest",
        }
    }

    /// Stable artifact stem derived from the model type.
    pub fn artifact_name(self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::RandomForest => "random_forest",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}_model.json", self.artifact_name())
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Logistic regression hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub max_iterations: u64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
        }
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Maximum tree depth; `None` grows trees until leaves are pure.
    pub max_depth: Option<usize>,
    /// Columns drawn at each split; `None` uses `ceil(sqrt(n_features))`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            max_features: None,
            seed: 42,
        }
    }
}

/// Bootstrap-aggregated Gini trees with a random column subset per split.
///
/// `P(churn)` is the mean leaf churn fraction over the trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    trees: Vec<ClassificationTree>,
}

impl RandomForest {
    pub fn fit(
        features: &Array2<f64>,
        targets: &Array1<usize>,
        params: &ForestParams,
    ) -> crate::Result<Self> {
        let (n_rows, n_features) = features.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(ChurnError::Training(
                "random forest needs a non-empty training table".to_string(),
            ));
        }
        if targets.len() != n_rows {
            return Err(ChurnError::Training(format!(
                "{} targets for {} training rows",
                targets.len(),
                n_rows
            )));
        }
        if params.n_trees == 0 {
            return Err(ChurnError::Training(
                "random forest needs at least one tree".to_string(),
            ));
        }

        let max_features = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .clamp(1, n_features);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            max_features: Some(max_features),
            ..TreeParams::default()
        };
        let targets = targets.to_vec();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            trees.push(ClassificationTree::fit(
                features,
                &targets,
                &rows,
                tree_params,
                &mut rng,
            ));
        }
        debug!(n_trees = trees.len(), max_features, "Random forest fitted");

        Ok(Self { n_features, trees })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn churn_probabilities(&self, features: &Array2<f64>) -> Array1<f64> {
        features
            .outer_iter()
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.churn_fraction(row))
                    .sum::<f64>()
                    / self.trees.len() as f64
            })
            .collect()
    }
}

/// A fitted classifier mapping scaled feature rows to churn probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum ChurnModel {
    LogisticRegression(FittedLogisticRegression<f64, usize>),
    RandomForest(RandomForest),
}

impl ChurnModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            ChurnModel::LogisticRegression(_) => ModelKind::LogisticRegression,
            ChurnModel::RandomForest(_) => ModelKind::RandomForest,
        }
    }

    /// Width of the feature rows the model was trained on.
    pub fn n_features(&self) -> usize {
        match self {
            ChurnModel::LogisticRegression(model) => model.params().len(),
            ChurnModel::RandomForest(forest) => forest.n_features,
        }
    }

    /// Per-row `[P(stay), P(churn)]`.
    pub fn predict_proba(&self, features: &Array2<f64>) -> crate::Result<Array2<f64>> {
        if features.ncols() != self.n_features() {
            return Err(ChurnError::SchemaMismatch(format!(
                "{} expects {} features, got {}",
                self.kind(),
                self.n_features(),
                features.ncols()
            )));
        }

        let churn = match self {
            ChurnModel::LogisticRegression(model) => {
                // Probabilities are reported for the fitted positive class.
                let positive = model.predict_probabilities(features);
                if model.labels().pos.class == CHURN {
                    positive
                } else {
                    positive.mapv(|p| 1.0 - p)
                }
            }
            ChurnModel::RandomForest(forest) => forest.churn_probabilities(features),
        };

        let mut proba = Array2::zeros((features.nrows(), 2));
        for (mut row, p_churn) in proba.outer_iter_mut().zip(churn.iter()) {
            let p_churn = p_churn.clamp(0.0, 1.0);
            row[STAY] = 1.0 - p_churn;
            row[CHURN] = p_churn;
        }
        Ok(proba)
    }

    /// Churn when `P(churn) > 0.5`, ties go to stay.
    pub fn predict(&self, features: &Array2<f64>) -> crate::Result<Array1<usize>> {
        let proba = self.predict_proba(features)?;
        Ok(proba
            .outer_iter()
            .map(|row| if row[CHURN] > 0.5 { CHURN } else { STAY })
            .collect())
    }
}

/// Fit logistic regression on a scaled training partition.
pub fn fit_logistic_regression(
    features: &Array2<f64>,
    targets: &Array1<usize>,
    params: &LogisticParams,
) -> crate::Result<ChurnModel> {
    let dataset = Dataset::new(features.clone(), targets.clone());
    let model = LogisticRegression::default()
        .max_iterations(params.max_iterations)
        .fit(&dataset)
        .map_err(|e| ChurnError::Training(format!("logistic regression: {}", e)))?;
    Ok(ChurnModel::LogisticRegression(model))
}

/// Fit one candidate classifier.
pub fn fit_model(
    kind: ModelKind,
    features: &Array2<f64>,
    targets: &Array1<usize>,
    logistic: &LogisticParams,
    forest: &ForestParams,
) -> crate::Result<ChurnModel> {
    match kind {
        ModelKind::LogisticRegression => fit_logistic_regression(features, targets, logistic),
        ModelKind::RandomForest => {
            RandomForest::fit(features, targets, forest).map(ChurnModel::RandomForest)
        }
    }
}
