//! Feature engineering and schema alignment
//!
//! Turns raw customer records into numeric feature vectors whose columns match
//! the [`FeatureSchema`] captured at training time. The same encoder runs over
//! the whole training table and over a single form submission; only the
//! strictness about missing raw fields differs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChurnError;

pub const TARGET_FIELD: &str = "Churn";
pub const TENURE_FIELD: &str = "tenure";
pub const MONTHLY_CHARGES_FIELD: &str = "MonthlyCharges";
pub const NUM_ADDITIONAL_SERVICES: &str = "NumAdditionalServices";
pub const LOW_TENURE_HIGH_CHARGE: &str = "HasLowTenureHighCharge";
pub const TENURE_GROUP_FIELD: &str = "TenureGroup";

/// Value of a service field that counts towards `NumAdditionalServices`.
pub const POSITIVE_SERVICE_VALUE: &str = "Yes";

/// Quantile of `MonthlyCharges` above which a charge counts as high.
pub const HIGH_CHARGE_QUANTILE: f64 = 0.75;

/// Tenure (months) at or below which a customer counts as low tenure.
pub const LOW_TENURE_MONTHS: f64 = 12.0;

/// Bucket boundaries for `TenureGroup`, right-inclusive.
pub const TENURE_BINS: [f64; 4] = [0.0, 12.0, 48.0, 72.0];

/// Numeric raw fields copied into the feature table unchanged.
pub const PASSTHROUGH_FIELDS: [&str; 3] = ["SeniorCitizen", "MonthlyCharges", "TotalCharges"];

/// Numeric raw fields of the source table.
pub const NUMERIC_RAW_FIELDS: [&str; 4] = ["SeniorCitizen", "tenure", "MonthlyCharges", "TotalCharges"];

/// Add-on services counted by `NumAdditionalServices`.
pub const SERVICE_FIELDS: [&str; 6] = [
    "OnlineSecurity",
    "OnlineBackup",
    "DeviceProtection",
    "TechSupport",
    "StreamingTV",
    "StreamingMovies",
];

/// Raw categorical fields, in the order their one-hot columns appear.
pub const CATEGORICAL_FIELDS: [&str; 15] = [
    "gender",
    "Partner",
    "Dependents",
    "PhoneService",
    "MultipleLines",
    "InternetService",
    "OnlineSecurity",
    "OnlineBackup",
    "DeviceProtection",
    "TechSupport",
    "StreamingTV",
    "StreamingMovies",
    "Contract",
    "PaperlessBilling",
    "PaymentMethod",
];

/// Every raw field a training record must carry, target excluded.
pub fn required_fields() -> impl Iterator<Item = &'static str> {
    NUMERIC_RAW_FIELDS
        .iter()
        .chain(CATEGORICAL_FIELDS.iter())
        .copied()
}

/// A single raw cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// One customer as read from the source table or submitted through the form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with_number(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, FieldValue::Number(value));
        self
    }

    pub fn with_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, FieldValue::Text(value.into()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Numeric view of a field; text cells are parsed leniently.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Text(text) => text.trim().parse().ok(),
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Text(text) => Some(text.as_str()),
            FieldValue::Number(_) => None,
        }
    }

    /// Fails with [`ChurnError::FieldMissing`] on the first absent field.
    pub fn require<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> crate::Result<()> {
        for name in names {
            if !self.contains(name) {
                return Err(ChurnError::FieldMissing {
                    field: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Tenure bucket engineered from the `tenure` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TenureGroup {
    New,
    Established,
    Loyal,
}

impl TenureGroup {
    pub const ALL: [TenureGroup; 3] = [TenureGroup::New, TenureGroup::Established, TenureGroup::Loyal];

    /// Bucket a tenure with right-inclusive boundaries; the lowest bucket also
    /// takes the lower bound itself. Out-of-range tenures have no bucket.
    pub fn from_tenure(tenure: f64, bins: &[f64; 4]) -> Option<Self> {
        if !tenure.is_finite() || tenure < bins[0] || tenure > bins[3] {
            return None;
        }
        if tenure <= bins[1] {
            Some(TenureGroup::New)
        } else if tenure <= bins[2] {
            Some(TenureGroup::Established)
        } else {
            Some(TenureGroup::Loyal)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TenureGroup::New => "New",
            TenureGroup::Established => "Established",
            TenureGroup::Loyal => "Loyal",
        }
    }
}

/// Training-time constants of the feature engineering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    /// `MonthlyCharges` value above which a charge counts as high.
    pub high_charge_threshold: f64,
    pub tenure_bins: [f64; 4],
}

impl FeatureParams {
    /// Capture the high-charge threshold from the training distribution.
    pub fn fit(records: &[RawRecord]) -> crate::Result<Self> {
        let charges: Vec<f64> = records
            .iter()
            .filter_map(|record| record.number(MONTHLY_CHARGES_FIELD))
            .filter(|value| value.is_finite())
            .collect();
        if charges.is_empty() {
            return Err(ChurnError::MalformedInput(format!(
                "no numeric {} values to derive the high-charge threshold from",
                MONTHLY_CHARGES_FIELD
            )));
        }

        let charges = Float64Chunked::from_vec(MONTHLY_CHARGES_FIELD, charges);
        let high_charge_threshold = charges
            .quantile(HIGH_CHARGE_QUANTILE, QuantileInterpolOptions::Linear)?
            .ok_or_else(|| {
                ChurnError::MalformedInput("high-charge quantile is undefined".to_string())
            })?;
        debug!(high_charge_threshold, "Captured high-charge threshold");

        Ok(Self {
            high_charge_threshold,
            tenure_bins: TENURE_BINS,
        })
    }
}

/// Ordered column names the trained models expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema; it must be non-empty and free of duplicates.
    pub fn new(columns: Vec<String>) -> crate::Result<Self> {
        if columns.is_empty() {
            return Err(ChurnError::SchemaMismatch(
                "reference schema has no columns".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(ChurnError::SchemaMismatch(format!(
                    "duplicate column '{}' in schema",
                    column
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Lay computed values out in schema order, imputing 0 for any column the
    /// record did not produce. Computed columns outside the schema are dropped.
    pub fn align(&self, computed: &HashMap<String, f64>) -> crate::Result<FeatureVector> {
        if self.columns.is_empty() {
            return Err(ChurnError::SchemaMismatch(
                "reference schema has no columns".to_string(),
            ));
        }
        let values = self
            .columns
            .iter()
            .map(|column| computed.get(column).copied().unwrap_or(0.0))
            .collect();
        Ok(FeatureVector(values))
    }
}

impl TryFrom<Vec<String>> for FeatureSchema {
    type Error = ChurnError;

    fn try_from(columns: Vec<String>) -> crate::Result<Self> {
        Self::new(columns)
    }
}

impl From<FeatureSchema> for Vec<String> {
    fn from(schema: FeatureSchema) -> Self {
        schema.columns
    }
}

/// Numeric values laid out in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_array(self) -> Array1<f64> {
        Array1::from_vec(self.0)
    }
}

/// One-hot column name for a category.
pub fn one_hot_column(field: &str, category: &str) -> String {
    format!("{}_{}", field, category)
}


/// Applies the feature-engineering rules with fixed training-time constants.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    params: FeatureParams,
}

impl FeatureEncoder {
    pub fn new(params: FeatureParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    /// Categorical values of a record, engineered `TenureGroup` included.
    fn categorical_values(&self, record: &RawRecord) -> Vec<(&'static str, String)> {
        let mut values: Vec<(&'static str, String)> = CATEGORICAL_FIELDS
            .iter()
            .filter_map(|&field| record.text(field).map(|value| (field, value.to_string())))
            .collect();

        if let Some(group) = self.tenure_group(record) {
            values.push((TENURE_GROUP_FIELD, group.label().to_string()));
        }
        values
    }

    fn tenure_group(&self, record: &RawRecord) -> Option<TenureGroup> {
        record
            .number(TENURE_FIELD)
            .and_then(|tenure| TenureGroup::from_tenure(tenure, &self.params.tenure_bins))
    }

    /// Every feature the record allows, keyed by column name.
    pub fn compute(&self, record: &RawRecord) -> HashMap<String, f64> {
        let mut computed = HashMap::new();

        for field in PASSTHROUGH_FIELDS {
            if let Some(value) = record.number(field) {
                computed.insert(field.to_string(), value);
            }
        }

        let services = record.number(NUM_ADDITIONAL_SERVICES).or_else(|| {
            SERVICE_FIELDS
                .iter()
                .all(|field| record.contains(field))
                .then(|| {
                    SERVICE_FIELDS
                        .iter()
                        .filter(|field| record.text(field) == Some(POSITIVE_SERVICE_VALUE))
                        .count() as f64
                })
        });
        if let Some(count) = services {
            computed.insert(NUM_ADDITIONAL_SERVICES.to_string(), count);
        }

        if let (Some(tenure), Some(charges)) = (
            record.number(TENURE_FIELD),
            record.number(MONTHLY_CHARGES_FIELD),
        ) {
            let flagged =
                tenure <= LOW_TENURE_MONTHS && charges > self.params.high_charge_threshold;
            computed.insert(
                LOW_TENURE_HIGH_CHARGE.to_string(),
                if flagged { 1.0 } else { 0.0 },
            );
        }
        if let Some(tenure) = record.number(TENURE_FIELD) {
            if self.tenure_group(record).is_none() {
                warn!(tenure, "Tenure outside bucket range, leaving TenureGroup unset");
            }
        }

        for (field, value) in self.categorical_values(record) {
            computed.insert(one_hot_column(field, &value), 1.0);
        }

        computed
    }

    /// Encode one record against the reference schema.
    pub fn encode(&self, record: &RawRecord, schema: &FeatureSchema) -> crate::Result<FeatureVector> {
        schema.align(&self.compute(record))
    }

    /// Encode a training batch; every record must carry every raw field.
    pub fn encode_batch(
        &self,
        records: &[RawRecord],
        schema: &FeatureSchema,
    ) -> crate::Result<Array2<f64>> {
        let mut matrix = Array2::zeros((records.len(), schema.len()));
        for (mut row, record) in matrix.outer_iter_mut().zip(records) {
            record.require(required_fields())?;
            let vector = self.encode(record, schema)?;
            row.assign(&Array1::from_vec(vector.0));
        }
        Ok(matrix)
    }

    /// Derive the training schema: numeric columns first, then the drop-first
    /// one-hot columns of each categorical field over the observed categories.
    /// `TenureGroup` always spans every bucket once any tenure was bucketed, so
    /// `New` stays the baseline.
    pub fn derive_schema(&self, records: &[RawRecord]) -> crate::Result<FeatureSchema> {
        let mut observed: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
        for record in records {
            record.require(required_fields())?;
            for (field, value) in self.categorical_values(record) {
                observed.entry(field).or_default().insert(value);
            }
        }

        let mut columns: Vec<String> = PASSTHROUGH_FIELDS
            .iter()
            .chain([NUM_ADDITIONAL_SERVICES, LOW_TENURE_HIGH_CHARGE].iter())
            .map(|name| name.to_string())
            .collect();

        for field in CATEGORICAL_FIELDS.iter().chain([TENURE_GROUP_FIELD].iter()) {
            let Some(categories) = observed.get(field) else {
                continue;
            };
            let categories: Vec<String> = if *field == TENURE_GROUP_FIELD {
                TenureGroup::ALL.iter().map(|group| group.label().to_string()).collect()
            } else {
                categories.iter().cloned().collect()
            };
            columns.extend(
                categories
                    .iter()
                    .skip(1)
                    .map(|category| one_hot_column(field, category)),
            );
        }

        FeatureSchema::new(columns)
    }
}
