//! ChurnForge: customer churn prediction from raw telecom customer records
//!
//! This library turns a raw customer CSV into an engineered numeric table,
//! trains logistic regression and random forest classifiers on it, persists
//! the scaler, schema and models, and serves single-record predictions from
//! those artifacts.

pub mod artifacts;
pub mod cli;
pub mod data;
pub mod error;
pub mod features;
pub mod inference;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod scaler;
pub mod split;
pub mod train;
pub mod tree;
pub mod viz;

// Re-export public items for easier access
pub use artifacts::{ArtifactBundle, Manifest, TrainingArtifacts};
pub use cli::{Args, Command};
pub use data::{load_raw_dataset, load_training_table, write_training_table, TrainingTable};
pub use error::ChurnError;
pub use features::{FeatureEncoder, FeatureParams, FeatureSchema, RawRecord, TenureGroup};
pub use inference::{predict_record, ChurnService, CustomerInput, Prediction};
pub use metrics::ClassificationReport;
pub use model::{ChurnModel, ModelKind};
pub use scaler::StandardScaler;
pub use split::{stratified_split, train_test_split};
pub use train::{train, TrainingConfig, TrainingSummary};
pub use viz::create_evaluation_chart;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, ChurnError>;
