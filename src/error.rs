//! Error types shared by the preprocessing, training and inference paths

use std::path::PathBuf;

/// Errors produced by the churn pipeline.
///
/// Training-time errors abort the whole run before any artifact is written.
/// Artifact errors at inference start are fatal; a request is never retried.
#[derive(Debug, thiserror::Error)]
pub enum ChurnError {
    /// A persisted artifact required by the inference service is absent.
    #[error("artifact not found at {}: retrain first", path.display())]
    MissingArtifact { path: PathBuf },

    /// An artifact does not match the digest recorded by the manifest.
    #[error("artifact at {} does not belong to the last completed training run: retrain or retry", path.display())]
    InconsistentBundle { path: PathBuf },

    /// The feature schema is empty or disagrees with a loaded artifact.
    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A raw field required for batch encoding is absent from a record.
    #[error("required field '{field}' is missing from the input record")]
    FieldMissing { field: String },

    /// The training dataset file does not exist.
    #[error("dataset not found at {}", path.display())]
    DatasetNotFound { path: PathBuf },

    /// The dataset or a request failed to parse.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A classifier failed to fit.
    #[error("model training failed: {0}")]
    Training(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    /// Rendering the evaluation chart failed.
    #[error("plot rendering failed: {0}")]
    Plot(String),
}

impl ChurnError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChurnError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        ChurnError::Serialization {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means "no trained artifacts yet" rather than a fault.
    pub fn is_missing_artifact(&self) -> bool {
        matches!(self, ChurnError::MissingArtifact { .. })
    }
}
