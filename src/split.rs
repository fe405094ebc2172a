//! Seeded, class-preserving train/test split

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::error::ChurnError;

/// Row indices of each partition, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// A feature matrix and its targets split into train and test partitions.
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train_features: Array2<f64>,
    pub train_targets: Array1<usize>,
    pub test_features: Array2<f64>,
    pub test_targets: Array1<usize>,
}

/// Split row indices so each class keeps its share in both partitions.
///
/// Each class is shuffled independently with the seeded RNG and contributes
/// `round(class_size * test_size)` rows to the test partition.
pub fn stratified_split(
    targets: &[usize],
    test_size: f64,
    seed: u64,
) -> crate::Result<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ChurnError::MalformedInput(format!(
            "test size must be in (0, 1), got {}",
            test_size
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in targets.iter().enumerate() {
        by_class.entry(label).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(targets.len());
    let mut test = Vec::new();
    for (label, mut rows) in by_class {
        rows.shuffle(&mut rng);
        let n_test = (rows.len() as f64 * test_size).round() as usize;
        debug!(label, total = rows.len(), n_test, "Stratified class split");
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(ChurnError::MalformedInput(format!(
            "dataset of {} rows is too small to split with test size {}",
            targets.len(),
            test_size
        )));
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(SplitIndices { train, test })
}

/// Split a feature matrix and its targets with [`stratified_split`].
pub fn train_test_split(
    features: &Array2<f64>,
    targets: &Array1<usize>,
    test_size: f64,
    seed: u64,
) -> crate::Result<TrainTestSplit> {
    if features.nrows() != targets.len() {
        return Err(ChurnError::MalformedInput(format!(
            "{} feature rows but {} targets",
            features.nrows(),
            targets.len()
        )));
    }
    let indices = stratified_split(&targets.to_vec(), test_size, seed)?;

    Ok(TrainTestSplit {
        train_features: features.select(Axis(0), &indices.train),
        train_targets: targets.select(Axis(0), &indices.train),
        test_features: features.select(Axis(0), &indices.test),
        test_targets: targets.select(Axis(0), &indices.test),
    })
}
