//! Single-record churn prediction over a loaded artifact bundle
//!
//! The service is created once per process with [`init`]. Its bundle is
//! immutable; [`ChurnService::reload`] loads a complete replacement and swaps
//! it in as a single `Arc`, so an in-flight prediction always sees one
//! consistent scaler, schema and model.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifacts::ArtifactBundle;
use crate::error::ChurnError;
use crate::features::{RawRecord, MONTHLY_CHARGES_FIELD, NUM_ADDITIONAL_SERVICES, TENURE_FIELD};
use crate::model::{ModelKind, CHURN, STAY};

pub const MONTHLY_CHARGES_RANGE: RangeInclusive<f64> = 18.0..=120.0;
pub const TOTAL_CHARGES_RANGE: RangeInclusive<f64> = 18.0..=9000.0;
pub const ADDITIONAL_SERVICES_RANGE: RangeInclusive<u8> = 0..=6;
pub const TENURE_RANGE: RangeInclusive<f64> = 0.0..=72.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Contract {
    MonthToMonth,
    OneYear,
    TwoYear,
}

impl Contract {
    pub fn label(self) -> &'static str {
        match self {
            Contract::MonthToMonth => "Month-to-month",
            Contract::OneYear => "One year",
            Contract::TwoYear => "Two year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum InternetService {
    Dsl,
    FiberOptic,
    No,
}

impl InternetService {
    pub fn label(self) -> &'static str {
        match self {
            InternetService::Dsl => "DSL",
            InternetService::FiberOptic => "Fiber optic",
            InternetService::No => "No",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum PaymentMethod {
    ElectronicCheck,
    MailedCheck,
    BankTransfer,
    CreditCard,
}

impl PaymentMethod {
    pub fn label(self) -> &'static str {
        match self {
            PaymentMethod::ElectronicCheck => "Electronic check",
            PaymentMethod::MailedCheck => "Mailed check",
            PaymentMethod::BankTransfer => "Bank transfer (automatic)",
            PaymentMethod::CreditCard => "Credit card (automatic)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn label(self) -> &'static str {
        match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        }
    }
}

/// The prediction form: every field the deployed model is fed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInput {
    pub monthly_charges: f64,
    pub total_charges: f64,
    pub num_additional_services: u8,
    pub contract: Contract,
    pub internet_service: InternetService,
    pub payment_method: PaymentMethod,
    pub paperless_billing: YesNo,
    pub partner: YesNo,
    pub dependents: YesNo,
    /// Months as a customer; enables the tenure-derived features.
    pub tenure: Option<f64>,
}

impl Default for CustomerInput {
    fn default() -> Self {
        Self {
            monthly_charges: 70.0,
            total_charges: 2000.0,
            num_additional_services: 2,
            contract: Contract::MonthToMonth,
            internet_service: InternetService::Dsl,
            payment_method: PaymentMethod::ElectronicCheck,
            paperless_billing: YesNo::Yes,
            partner: YesNo::Yes,
            dependents: YesNo::Yes,
            tenure: None,
        }
    }
}

impl CustomerInput {
    /// Reject values outside the ranges the form offers.
    pub fn validate(&self) -> crate::Result<()> {
        if !MONTHLY_CHARGES_RANGE.contains(&self.monthly_charges) {
            return Err(ChurnError::MalformedInput(format!(
                "monthly charges {} outside {:?}",
                self.monthly_charges, MONTHLY_CHARGES_RANGE
            )));
        }
        if !TOTAL_CHARGES_RANGE.contains(&self.total_charges) {
            return Err(ChurnError::MalformedInput(format!(
                "total charges {} outside {:?}",
                self.total_charges, TOTAL_CHARGES_RANGE
            )));
        }
        if !ADDITIONAL_SERVICES_RANGE.contains(&self.num_additional_services) {
            return Err(ChurnError::MalformedInput(format!(
                "additional services {} outside {:?}",
                self.num_additional_services, ADDITIONAL_SERVICES_RANGE
            )));
        }
        if let Some(tenure) = self.tenure {
            if !TENURE_RANGE.contains(&tenure) {
                return Err(ChurnError::MalformedInput(format!(
                    "tenure {} outside {:?}",
                    tenure, TENURE_RANGE
                )));
            }
        }
        Ok(())
    }

    pub fn to_raw_record(&self) -> RawRecord {
        let record = RawRecord::new()
            .with_number(MONTHLY_CHARGES_FIELD, self.monthly_charges)
            .with_number("TotalCharges", self.total_charges)
            .with_number(NUM_ADDITIONAL_SERVICES, f64::from(self.num_additional_services))
            .with_text("Contract", self.contract.label())
            .with_text("InternetService", self.internet_service.label())
            .with_text("PaymentMethod", self.payment_method.label())
            .with_text("PaperlessBilling", self.paperless_billing.label())
            .with_text("Partner", self.partner.label())
            .with_text("Dependents", self.dependents.label());
        match self.tenure {
            Some(tenure) => record.with_number(TENURE_FIELD, tenure),
            None => record,
        }
    }
}

/// Predicted class and `[P(stay), P(churn)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: usize,
    pub probabilities: [f64; 2],
    pub model: ModelKind,
}

impl Prediction {
    pub fn is_churn(&self) -> bool {
        self.label == CHURN
    }

    pub fn label_name(&self) -> &'static str {
        if self.is_churn() {
            "Churn"
        } else {
            "Stay"
        }
    }

    pub fn stay_probability(&self) -> f64 {
        self.probabilities[STAY]
    }

    pub fn churn_probability(&self) -> f64 {
        self.probabilities[CHURN]
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_churn() {
            writeln!(f, "This customer is likely to CHURN.")?;
        } else {
            writeln!(f, "This customer is likely to STAY.")?;
        }
        writeln!(f, "Probability of Not Churning: {:.2}", self.stay_probability())?;
        write!(f, "Probability of Churning: {:.2}", self.churn_probability())
    }
}

/// Encode, scale and classify one record with a bundle.
pub fn predict_record(bundle: &ArtifactBundle, record: &RawRecord) -> crate::Result<Prediction> {
    let vector = bundle.encoder.encode(record, &bundle.schema)?;
    let scaled = bundle.scaler.transform_vector(&vector)?;
    let proba = bundle.model.predict_proba(&scaled)?;
    let labels = bundle.model.predict(&scaled)?;

    let prediction = Prediction {
        label: labels[0],
        probabilities: [proba[[0, STAY]], proba[[0, CHURN]]],
        model: bundle.model.kind(),
    };
    debug!(
        label = prediction.label,
        p_churn = prediction.churn_probability(),
        "Predicted"
    );
    Ok(prediction)
}

/// Long-lived prediction service over one artifact bundle.
#[derive(Debug)]
pub struct ChurnService {
    model_dir: PathBuf,
    kind: ModelKind,
    bundle: RwLock<Arc<ArtifactBundle>>,
}

impl ChurnService {
    /// Load the bundle; missing artifacts are fatal here, not per request.
    pub fn start(model_dir: &Path, kind: ModelKind) -> crate::Result<Self> {
        let bundle = ArtifactBundle::load(model_dir, kind)?;
        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            kind,
            bundle: RwLock::new(Arc::new(bundle)),
        })
    }

    pub fn model_kind(&self) -> ModelKind {
        self.kind
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// The bundle currently served.
    pub fn bundle(&self) -> Arc<ArtifactBundle> {
        let guard = self.bundle.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn predict(&self, input: &CustomerInput) -> crate::Result<Prediction> {
        input.validate()?;
        self.predict_record(&input.to_raw_record())
    }

    pub fn predict_record(&self, record: &RawRecord) -> crate::Result<Prediction> {
        predict_record(&self.bundle(), record)
    }

    /// Load a fresh bundle from disk and swap it in as one unit. On failure the
    /// current bundle keeps serving.
    pub fn reload(&self) -> crate::Result<()> {
        let fresh = Arc::new(ArtifactBundle::load(&self.model_dir, self.kind)?);
        let mut guard = self.bundle.write().unwrap_or_else(PoisonError::into_inner);
        *guard = fresh;
        info!(dir = %self.model_dir.display(), model = %self.kind, "Reloaded artifact bundle");
        Ok(())
    }
}

static SERVICE: OnceLock<ChurnService> = OnceLock::new();

/// Initialize the process-wide service. Later calls return the first service.
pub fn init(model_dir: &Path, kind: ModelKind) -> crate::Result<&'static ChurnService> {
    if let Some(service) = SERVICE.get() {
        return Ok(service);
    }
    let service = ChurnService::start(model_dir, kind)?;
    Ok(SERVICE.get_or_init(|| service))
}

/// The process-wide service, if [`init`] has succeeded.
pub fn service() -> Option<&'static ChurnService> {
    SERVICE.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{Manifest, TrainingArtifacts};
    use crate::features::{FeatureEncoder, FeatureParams, FeatureSchema, TENURE_BINS};
    use crate::model::{fit_model, ForestParams, LogisticParams};
    use crate::scaler::StandardScaler;
    use crate::train::TrainingConfig;
    use chrono::Utc;
    use ndarray::{Array1, Array2};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            [
                "MonthlyCharges",
                "TotalCharges",
                "NumAdditionalServices",
                "HasLowTenureHighCharge",
                "Contract_One year",
                "Contract_Two year",
                "InternetService_Fiber optic",
                "TenureGroup_Established",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
        .unwrap()
    }

    fn bundle(kind: ModelKind) -> ArtifactBundle {
        let schema = schema();
        let features = Array2::from_shape_fn((40, schema.len()), |(row, col)| {
            let churn = row % 2 == 1;
            match col {
                0 => (if churn { 60.0 } else { 45.0 }) + (row % 7) as f64 * 3.0,
                1 => 100.0 * (row % 9) as f64 + 50.0,
                2 => (row % 7) as f64,
                6 => f64::from(u8::from(churn)),
                4 => f64::from(u8::from(!churn && row % 4 == 0)),
                _ => ((row + col) % 2) as f64,
            }
        });
        let targets = Array1::from_shape_fn(40, |row| row % 2);
        let scaler = StandardScaler::fit(&features).unwrap();
        let scaled = scaler.transform(&features).unwrap();
        let forest = ForestParams {
            n_trees: 9,
            max_depth: Some(5),
            ..ForestParams::default()
        };
        let model = fit_model(kind, &scaled, &targets, &LogisticParams::default(), &forest).unwrap();
        ArtifactBundle {
            schema,
            scaler,
            encoder: FeatureEncoder::new(FeatureParams {
                high_charge_threshold: 89.85,
                tenure_bins: TENURE_BINS,
            }),
            model,
        }
    }

    fn save_bundle(dir: &Path, bundle: &ArtifactBundle) {
        TrainingArtifacts {
            schema: bundle.schema.clone(),
            scaler: bundle.scaler.clone(),
            params: bundle.encoder.params().clone(),
            models: vec![bundle.model.clone()],
            manifest: Manifest {
                trained_at: Utc::now(),
                config: TrainingConfig::default(),
                train_rows: 40,
                test_rows: 0,
                n_features: bundle.schema.len(),
                models: vec![bundle.model.kind()],
                digests: BTreeMap::new(),
            },
        }
        .save(dir)
        .unwrap();
    }

    fn fixed_input() -> CustomerInput {
        CustomerInput {
            monthly_charges: 70.0,
            total_charges: 2000.0,
            num_additional_services: 2,
            contract: Contract::MonthToMonth,
            internet_service: InternetService::FiberOptic,
            payment_method: PaymentMethod::ElectronicCheck,
            paperless_billing: YesNo::Yes,
            partner: YesNo::No,
            dependents: YesNo::No,
            tenure: None,
        }
    }

    #[test]
    fn test_raw_record_from_input() {
        let record = fixed_input().to_raw_record();
        assert_eq!(record.number("MonthlyCharges"), Some(70.0));
        assert_eq!(record.number("NumAdditionalServices"), Some(2.0));
        assert_eq!(record.text("Contract"), Some("Month-to-month"));
        assert_eq!(record.text("InternetService"), Some("Fiber optic"));
        assert_eq!(record.text("PaymentMethod"), Some("Electronic check"));
        assert!(!record.contains("tenure"));

        let with_tenure = CustomerInput {
            tenure: Some(5.0),
            ..fixed_input()
        };
        assert_eq!(with_tenure.to_raw_record().number("tenure"), Some(5.0));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(fixed_input().validate().is_ok());
        assert!(CustomerInput::default().validate().is_ok());

        let cheap = CustomerInput {
            monthly_charges: 10.0,
            ..fixed_input()
        };
        assert!(cheap.validate().is_err());
        let too_many = CustomerInput {
            num_additional_services: 7,
            ..fixed_input()
        };
        assert!(too_many.validate().is_err());
        let long = CustomerInput {
            tenure: Some(80.0),
            ..fixed_input()
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_prediction_probabilities_sum_to_one() {
        for kind in ModelKind::ALL {
            let bundle = bundle(kind);
            let prediction = predict_record(&bundle, &fixed_input().to_raw_record()).unwrap();

            assert!(prediction.label == STAY || prediction.label == CHURN);
            let total: f64 = prediction.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
            assert_eq!(prediction.model, kind);
            assert_eq!(prediction.is_churn(), prediction.churn_probability() > 0.5);
        }
    }

    #[test]
    fn test_prediction_display() {
        let prediction = Prediction {
            label: CHURN,
            probabilities: [0.254, 0.746],
            model: ModelKind::LogisticRegression,
        };
        let text = prediction.to_string();
        assert!(text.contains("likely to CHURN"));
        assert!(text.contains("Probability of Not Churning: 0.25"));
        assert!(text.contains("Probability of Churning: 0.75"));
        assert_eq!(prediction.label_name(), "Churn");
    }

    #[test]
    fn test_service_requires_artifacts() {
        let dir = tempdir().unwrap();
        let result = ChurnService::start(dir.path(), ModelKind::LogisticRegression);
        assert!(matches!(result, Err(ChurnError::MissingArtifact { .. })));
    }

    #[test]
    fn test_service_reload_swaps_bundle() {
        let dir = tempdir().unwrap();
        let first = bundle(ModelKind::LogisticRegression);
        save_bundle(dir.path(), &first);

        let service = ChurnService::start(dir.path(), ModelKind::LogisticRegression).unwrap();
        let before = service.bundle();
        assert!(service.predict(&fixed_input()).is_ok());

        let mut second = bundle(ModelKind::LogisticRegression);
        second.encoder = FeatureEncoder::new(FeatureParams {
            high_charge_threshold: 50.0,
            tenure_bins: TENURE_BINS,
        });
        save_bundle(dir.path(), &second);
        service.reload().unwrap();

        let after = service.bundle();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.encoder.params().high_charge_threshold, 50.0);
        assert_eq!(before.encoder.params().high_charge_threshold, 89.85);
    }

    #[test]
    fn test_init_keeps_first_service() {
        let dir = tempdir().unwrap();
        let current = bundle(ModelKind::LogisticRegression);
        save_bundle(dir.path(), &current);

        let first = init(dir.path(), ModelKind::LogisticRegression).unwrap();
        let other = tempdir().unwrap();
        let second = init(other.path(), ModelKind::RandomForest).unwrap();

        assert!(std::ptr::eq(first, second));
        assert_eq!(second.model_kind(), ModelKind::LogisticRegression);
        assert!(service().is_some());
    }

    #[test]
    fn test_failed_reload_keeps_current_bundle() {
        let dir = tempdir().unwrap();
        let current = bundle(ModelKind::RandomForest);
        save_bundle(dir.path(), &current);

        let service = ChurnService::start(dir.path(), ModelKind::RandomForest).unwrap();
        let before = service.bundle();
        std::fs::remove_file(dir.path().join(crate::artifacts::SCHEMA_FILE)).unwrap();

        assert!(service.reload().is_err());
        assert!(Arc::ptr_eq(&before, &service.bundle()));
        assert!(service.predict(&fixed_input()).is_ok());
    }
}
