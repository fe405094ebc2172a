//! Persisted training artifacts: scaler, schema, feature constants and models
//!
//! One retrain cycle writes a bundle of independently loadable JSON files into
//! the model directory. Every payload is serialized before the first write, and
//! each file is written to a temporary sibling and renamed into place, so a
//! failed run never leaves a half-written artifact behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::ChurnError;
use crate::features::{FeatureEncoder, FeatureParams, FeatureSchema};
use crate::model::{ChurnModel, ModelKind};
use crate::scaler::StandardScaler;
use crate::train::TrainingConfig;

pub const SCALER_FILE: &str = "scaler.json";
pub const SCHEMA_FILE: &str = "train_columns.json";
pub const FEATURE_PARAMS_FILE: &str = "feature_params.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Metadata of one retrain cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub trained_at: DateTime<Utc>,
    pub config: TrainingConfig,
    pub train_rows: usize,
    pub test_rows: usize,
    pub n_features: usize,
    pub models: Vec<ModelKind>,
    /// SHA-256 of every artifact file written with this manifest, by file name.
    #[serde(default)]
    pub digests: BTreeMap<String, String>,
}

/// Everything a retrain cycle persists.
#[derive(Debug, Clone)]
pub struct TrainingArtifacts {
    pub schema: FeatureSchema,
    pub scaler: StandardScaler,
    pub params: FeatureParams,
    pub models: Vec<ChurnModel>,
    pub manifest: Manifest,
}

fn to_json<T: Serialize>(value: &T, path: &Path) -> crate::Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| ChurnError::serialization(path, e))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir).map_err(|e| ChurnError::io(dir, e))?;
    file.write_all(bytes).map_err(|e| ChurnError::io(path, e))?;
    file.persist(path)
        .map_err(|e| ChurnError::io(path, e.error))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    Ok(())
}

fn encode_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    encode_hex(&Sha256::digest(bytes))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl TrainingArtifacts {
    /// Write the bundle into `model_dir`, returning the written paths.
    ///
    /// The manifest goes last and records the digest of every other file, so
    /// a bundle left half-replaced by an interrupted save fails to load.
    pub fn save(&self, model_dir: &Path) -> crate::Result<Vec<PathBuf>> {
        let mut payloads = Vec::with_capacity(self.models.len() + 4);
        let scaler_path = model_dir.join(SCALER_FILE);
        payloads.push((to_json(&self.scaler, &scaler_path)?, scaler_path));
        let schema_path = model_dir.join(SCHEMA_FILE);
        payloads.push((to_json(&self.schema, &schema_path)?, schema_path));
        let params_path = model_dir.join(FEATURE_PARAMS_FILE);
        payloads.push((to_json(&self.params, &params_path)?, params_path));
        for model in &self.models {
            let path = model_dir.join(model.kind().file_name());
            payloads.push((to_json(model, &path)?, path));
        }

        let mut manifest = self.manifest.clone();
        manifest.digests = payloads
            .iter()
            .map(|(bytes, path)| (file_name(path), sha256_hex(bytes)))
            .collect();
        let manifest_path = model_dir.join(MANIFEST_FILE);
        payloads.push((to_json(&manifest, &manifest_path)?, manifest_path));

        fs::create_dir_all(model_dir).map_err(|e| ChurnError::io(model_dir, e))?;
        let mut written = Vec::with_capacity(payloads.len());
        for (bytes, path) in payloads {
            write_atomic(&path, &bytes)?;
            written.push(path);
        }
        info!(dir = %model_dir.display(), files = written.len(), "Saved training artifacts");
        Ok(written)
    }
}

fn read_bytes(path: &Path) -> crate::Result<Vec<u8>> {
    if !path.is_file() {
        return Err(ChurnError::MissingArtifact {
            path: path.to_path_buf(),
        });
    }
    fs::read(path).map_err(|e| ChurnError::io(path, e))
}

fn parse<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> crate::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ChurnError::serialization(path, e))
}

/// Read one JSON artifact; an absent file is [`ChurnError::MissingArtifact`].
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> crate::Result<T> {
    parse(&read_bytes(path)?, path)
}

pub fn load_manifest(model_dir: &Path) -> crate::Result<Manifest> {
    read_artifact(&model_dir.join(MANIFEST_FILE))
}

/// Read an artifact and check it against the manifest digest.
fn read_verified<T: DeserializeOwned>(path: &Path, manifest: &Manifest) -> crate::Result<T> {
    let bytes = read_bytes(path)?;
    let name = file_name(path);
    if manifest.digests.get(&name) != Some(&sha256_hex(&bytes)) {
        return Err(ChurnError::InconsistentBundle {
            path: path.to_path_buf(),
        });
    }
    parse(&bytes, path)
}

/// The scaler, schema, feature constants and one model, loaded as a unit.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub schema: FeatureSchema,
    pub scaler: StandardScaler,
    pub encoder: FeatureEncoder,
    pub model: ChurnModel,
}

impl ArtifactBundle {
    /// Load and cross-check the artifacts needed to serve `kind`; every file
    /// must match the digest the manifest recorded for it.
    pub fn load(model_dir: &Path, kind: ModelKind) -> crate::Result<Self> {
        let manifest = load_manifest(model_dir)?;
        let scaler: StandardScaler = read_verified(&model_dir.join(SCALER_FILE), &manifest)?;
        let schema: FeatureSchema = read_verified(&model_dir.join(SCHEMA_FILE), &manifest)?;
        let params: FeatureParams =
            read_verified(&model_dir.join(FEATURE_PARAMS_FILE), &manifest)?;
        let model_path = model_dir.join(kind.file_name());
        let model: ChurnModel = read_verified(&model_path, &manifest)?;

        if model.kind() != kind {
            return Err(ChurnError::MalformedInput(format!(
                "{} holds a {} model, expected {}",
                model_path.display(),
                model.kind(),
                kind
            )));
        }

        let bundle = Self {
            schema,
            scaler,
            encoder: FeatureEncoder::new(params),
            model,
        };
        bundle.validate()?;
        info!(dir = %model_dir.display(), model = %kind, "Loaded artifact bundle");
        Ok(bundle)
    }

    /// Scaler and model widths must match the schema.
    pub fn validate(&self) -> crate::Result<()> {
        if self.scaler.n_features() != self.schema.len() {
            return Err(ChurnError::SchemaMismatch(format!(
                "scaler has {} columns but the schema has {}",
                self.scaler.n_features(),
                self.schema.len()
            )));
        }
        if self.model.n_features() != self.schema.len() {
            return Err(ChurnError::SchemaMismatch(format!(
                "{} expects {} columns but the schema has {}",
                self.model.kind(),
                self.model.n_features(),
                self.schema.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fit_model, ForestParams, LogisticParams};
    use ndarray::{Array1, Array2};
    use tempfile::tempdir;

    fn sample_artifacts() -> TrainingArtifacts {
        let features = Array2::from_shape_fn((30, 3), |(row, col)| {
            ((row * (col + 2)) % 7) as f64 + if row % 2 == 0 { 3.0 } else { 0.0 }
        });
        let targets = Array1::from_shape_fn(30, |row| row % 2);
        let scaler = StandardScaler::fit(&features).unwrap();
        let scaled = scaler.transform(&features).unwrap();
        let forest = ForestParams {
            n_trees: 5,
            max_depth: Some(4),
            ..ForestParams::default()
        };
        let models = ModelKind::ALL
            .iter()
            .map(|&kind| {
                fit_model(kind, &scaled, &targets, &LogisticParams::default(), &forest).unwrap()
            })
            .collect();

        TrainingArtifacts {
            schema: FeatureSchema::new(vec![
                "MonthlyCharges".to_string(),
                "TotalCharges".to_string(),
                "NumAdditionalServices".to_string(),
            ])
            .unwrap(),
            scaler,
            params: FeatureParams {
                high_charge_threshold: 89.85,
                tenure_bins: crate::features::TENURE_BINS,
            },
            models,
            manifest: Manifest {
                trained_at: Utc::now(),
                config: TrainingConfig::default(),
                train_rows: 24,
                test_rows: 6,
                n_features: 3,
                models: ModelKind::ALL.to_vec(),
                digests: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_save_writes_every_artifact() {
        let dir = tempdir().unwrap();
        let written = sample_artifacts().save(dir.path()).unwrap();

        assert_eq!(written.len(), 6);
        for name in [
            SCALER_FILE,
            SCHEMA_FILE,
            FEATURE_PARAMS_FILE,
            MANIFEST_FILE,
            "logistic_regression_model.json",
            "random_forest_model.json",
        ] {
            assert!(dir.path().join(name).is_file(), "{} missing", name);
        }
    }

    #[test]
    fn test_load_round_trip_preserves_alignment() {
        let dir = tempdir().unwrap();
        let artifacts = sample_artifacts();
        artifacts.save(dir.path()).unwrap();

        let bundle = ArtifactBundle::load(dir.path(), ModelKind::RandomForest).unwrap();
        assert_eq!(bundle.schema, artifacts.schema);
        assert_eq!(bundle.scaler, artifacts.scaler);
        assert_eq!(bundle.encoder.params(), &artifacts.params);
        assert_eq!(bundle.model.kind(), ModelKind::RandomForest);

        let manifest = load_manifest(dir.path()).unwrap();
        assert_eq!(manifest.models, ModelKind::ALL.to_vec());
    }

    #[test]
    fn test_missing_artifact_is_reported() {
        let dir = tempdir().unwrap();
        sample_artifacts().save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(SCALER_FILE)).unwrap();

        match ArtifactBundle::load(dir.path(), ModelKind::LogisticRegression) {
            Err(ChurnError::MissingArtifact { path }) => assert!(path.ends_with(SCALER_FILE)),
            other => panic!("expected MissingArtifact, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_skew_is_rejected() {
        let dir = tempdir().unwrap();
        let mut artifacts = sample_artifacts();
        artifacts.schema = FeatureSchema::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        artifacts.save(dir.path()).unwrap();

        let result = ArtifactBundle::load(dir.path(), ModelKind::LogisticRegression);
        assert!(matches!(result, Err(ChurnError::SchemaMismatch(_))));
    }

    #[test]
    fn test_resave_is_byte_identical() {
        let artifacts = sample_artifacts();
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        artifacts.save(first.path()).unwrap();
        artifacts.save(second.path()).unwrap();

        for name in [SCALER_FILE, SCHEMA_FILE] {
            let a = fs::read(first.path().join(name)).unwrap();
            let b = fs::read(second.path().join(name)).unwrap();
            assert_eq!(a, b, "{} differs", name);
        }
    }

    #[test]
    fn test_manifest_records_digest_per_file() {
        let dir = tempdir().unwrap();
        sample_artifacts().save(dir.path()).unwrap();

        let manifest = load_manifest(dir.path()).unwrap();
        assert_eq!(manifest.digests.len(), 5);
        let scaler_bytes = fs::read(dir.path().join(SCALER_FILE)).unwrap();
        assert_eq!(manifest.digests[SCALER_FILE], sha256_hex(&scaler_bytes));
        assert!(!manifest.digests.contains_key(MANIFEST_FILE));
    }

    #[test]
    fn test_scaler_from_another_run_is_rejected() {
        let dir = tempdir().unwrap();
        sample_artifacts().save(dir.path()).unwrap();

        // Same width, different statistics: passes every shape check.
        let other = Array2::from_shape_fn((10, 3), |(row, col)| (row * 10 + col) as f64);
        let stale = StandardScaler::fit(&other).unwrap();
        fs::write(
            dir.path().join(SCALER_FILE),
            serde_json::to_vec_pretty(&stale).unwrap(),
        )
        .unwrap();

        match ArtifactBundle::load(dir.path(), ModelKind::LogisticRegression) {
            Err(ChurnError::InconsistentBundle { path }) => assert!(path.ends_with(SCALER_FILE)),
            other => panic!("expected InconsistentBundle, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_manifest_is_reported() {
        let dir = tempdir().unwrap();
        sample_artifacts().save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(MANIFEST_FILE)).unwrap();

        let result = ArtifactBundle::load(dir.path(), ModelKind::RandomForest);
        assert!(matches!(result, Err(ChurnError::MissingArtifact { .. })));
    }
}
