//! Per-column standardization fit once on the training partition

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ChurnError;
use crate::features::FeatureVector;

/// Fitted `(x - mean) / scale` transform.
///
/// `scale` is the population standard deviation of each column; a constant
/// column keeps a scale of 1 so it maps to 0 instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit column statistics on `data` (rows are samples).
    pub fn fit(data: &Array2<f64>) -> crate::Result<Self> {
        let mean = data.mean_axis(Axis(0)).ok_or_else(|| {
            ChurnError::MalformedInput("cannot fit scaler on an empty table".to_string())
        })?;
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std == 0.0 || !std.is_finite() { 1.0 } else { std });

        Ok(Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    fn check_width(&self, width: usize) -> crate::Result<()> {
        if width != self.n_features() {
            return Err(ChurnError::SchemaMismatch(format!(
                "scaler was fit on {} columns, got {}",
                self.n_features(),
                width
            )));
        }
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(data.ncols())?;
        let mean = Array1::from_vec(self.mean.clone());
        let scale = Array1::from_vec(self.scale.clone());
        Ok((data - &mean) / &scale)
    }

    /// Scale a single encoded record into a one-row matrix.
    pub fn transform_vector(&self, vector: &FeatureVector) -> crate::Result<Array2<f64>> {
        let row = Array2::from_shape_vec((1, vector.len()), vector.values().to_vec())?;
        self.transform(&row)
    }

    pub fn inverse_transform(&self, data: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(data.ncols())?;
        let mean = Array1::from_vec(self.mean.clone());
        let scale = Array1::from_vec(self.scale.clone());
        Ok(data * &scale + &mean)
    }
}
