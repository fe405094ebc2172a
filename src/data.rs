//! Data loading, cleaning and export of the engineered churn table using Polars

use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array2};
use polars::prelude::*;
use tracing::{info, warn};

use crate::error::ChurnError;
use crate::features::{
    required_fields, FeatureEncoder, FeatureParams, FeatureSchema, FieldValue, RawRecord,
    CATEGORICAL_FIELDS, NUMERIC_RAW_FIELDS, TARGET_FIELD,
};
use crate::model::{CHURN, STAY};

/// Target value marking a churned customer.
pub const CHURN_POSITIVE: &str = "Yes";

/// Raw customers and their churn labels, in file order.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub records: Vec<RawRecord>,
    pub targets: Vec<usize>,
}

/// Engineered numeric table with the schema and constants that produced it.
#[derive(Debug, Clone)]
pub struct TrainingTable {
    pub schema: FeatureSchema,
    pub params: FeatureParams,
    /// Encoded features (n_customers, schema.len())
    pub features: Array2<f64>,
    pub targets: Array1<usize>,
}

impl TrainingTable {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    /// Share of churned customers.
    pub fn churn_rate(&self) -> f64 {
        if self.targets.is_empty() {
            return 0.0;
        }
        self.targets.iter().filter(|&&t| t == CHURN).count() as f64 / self.targets.len() as f64
    }
}

/// Load the raw customer CSV.
///
/// Every column is read as text; numeric columns are then cast non-strictly so
/// unparseable cells (blank `TotalCharges`, for example) become missing and
/// are imputed with the column median.
pub fn load_raw_dataset(path: &Path) -> crate::Result<RawDataset> {
    if !path.is_file() {
        return Err(ChurnError::DatasetNotFound {
            path: path.to_path_buf(),
        });
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| {
            ChurnError::MalformedInput(format!("failed to parse {}: {}", path.display(), e))
        })?;

    if df.height() == 0 {
        return Err(ChurnError::MalformedInput(format!(
            "{} contains no data rows",
            path.display()
        )));
    }

    let names = df.get_column_names();
    for field in required_fields().chain([TARGET_FIELD]) {
        if !names.contains(&field) {
            return Err(ChurnError::FieldMissing {
                field: field.to_string(),
            });
        }
    }

    let df = coerce_numeric_columns(df)?;
    let dataset = frame_to_dataset(&df)?;
    info!(
        rows = dataset.records.len(),
        path = %path.display(),
        "Loaded raw customer data"
    );
    Ok(dataset)
}

/// Cast numeric columns to `f64` and fill missing cells with the median.
fn coerce_numeric_columns(df: DataFrame) -> crate::Result<DataFrame> {
    let casts: Vec<Expr> = NUMERIC_RAW_FIELDS
        .iter()
        .map(|&name| col(name).cast(DataType::Float64))
        .collect();
    let df = df.lazy().with_columns(casts).collect()?;

    for name in NUMERIC_RAW_FIELDS {
        let missing = df.column(name)?.null_count();
        if missing == df.height() {
            return Err(ChurnError::MalformedInput(format!(
                "column '{}' has no numeric values",
                name
            )));
        }
        if missing > 0 {
            warn!(
                column = name,
                count = missing,
                "Non-numeric values coerced to missing and imputed with the column median"
            );
        }
    }

    let fills: Vec<Expr> = NUMERIC_RAW_FIELDS
        .iter()
        .map(|&name| col(name).fill_null(col(name).median()))
        .collect();
    Ok(df.lazy().with_columns(fills).collect()?)
}

fn frame_to_dataset(df: &DataFrame) -> crate::Result<RawDataset> {
    let mut records = vec![RawRecord::new(); df.height()];

    for name in NUMERIC_RAW_FIELDS {
        let column = df.column(name)?.f64()?;
        for (record, value) in records.iter_mut().zip(column.into_iter()) {
            if let Some(value) = value {
                record.insert(name, FieldValue::Number(value));
            }
        }
    }

    for name in CATEGORICAL_FIELDS {
        let column = df.column(name)?.str()?;
        for (record, value) in records.iter_mut().zip(column.into_iter()) {
            if let Some(value) = value {
                record.insert(name, FieldValue::Text(value.trim().to_string()));
            }
        }
    }

    let targets = df
        .column(TARGET_FIELD)?
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value.map(str::trim) {
            Some(CHURN_POSITIVE) => Ok(CHURN),
            Some(_) => Ok(STAY),
            None => Err(ChurnError::MalformedInput(format!(
                "row {} has no '{}' value",
                row + 1,
                TARGET_FIELD
            ))),
        })
        .collect::<crate::Result<Vec<usize>>>()?;

    Ok(RawDataset { records, targets })
}

/// Engineer and encode a raw dataset into the full numeric table.
pub fn build_training_table(raw: &RawDataset) -> crate::Result<TrainingTable> {
    let params = FeatureParams::fit(&raw.records)?;
    let encoder = FeatureEncoder::new(params.clone());
    let schema = encoder.derive_schema(&raw.records)?;
    let features = encoder.encode_batch(&raw.records, &schema)?;
    info!(
        rows = features.nrows(),
        columns = schema.len(),
        high_charge_threshold = params.high_charge_threshold,
        "Engineered feature table"
    );

    Ok(TrainingTable {
        schema,
        params,
        features,
        targets: Array1::from_vec(raw.targets.clone()),
    })
}

/// Load a raw CSV and encode it into a training table.
pub fn load_training_table(path: &Path) -> crate::Result<TrainingTable> {
    let raw = load_raw_dataset(path)?;
    build_training_table(&raw)
}

/// Write the engineered table (schema columns, then `Churn`) as CSV.
pub fn write_training_table(table: &TrainingTable, path: &Path) -> crate::Result<()> {
    let mut columns: Vec<Series> = table
        .schema
        .columns()
        .iter()
        .zip(table.features.columns())
        .map(|(name, values)| Series::new(name, values.to_vec()))
        .collect();
    let targets: Vec<i32> = table.targets.iter().map(|&t| t as i32).collect();
    columns.push(Series::new(TARGET_FIELD, targets));

    let mut df = DataFrame::new(columns)?;
    let mut file = File::create(path).map_err(|e| ChurnError::io(path, e))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;
    info!(path = %path.display(), rows = df.height(), "Wrote engineered table");
    Ok(())
}
