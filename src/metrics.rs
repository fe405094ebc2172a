//! Evaluation metrics for the binary churn classifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{CHURN, STAY};

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn from_predictions(n_classes: usize, truth: &[usize], predicted: &[usize]) -> Self {
        let mut matrix = Self::new(n_classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            matrix.add(t, p);
        }
        matrix
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        self.counts[truth * self.n_classes + predicted] += 1;
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Precision, recall and F1 for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

/// Per-class scores plus accuracy and macro/weighted averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

impl ClassificationReport {
    /// Build a report from a confusion matrix; `labels[k]` names class `k`.
    pub fn from_confusion(matrix: &ConfusionMatrix, labels: &[&str]) -> Self {
        let k = matrix.n_classes;
        let mut classes = Vec::with_capacity(k);
        let mut correct = 0u64;

        for class in 0..k {
            let tp = matrix.get(class, class) as f64;
            correct += matrix.get(class, class);
            let support: u64 = (0..k).map(|j| matrix.get(class, j)).sum();
            let predicted: u64 = (0..k).map(|i| matrix.get(i, class)).sum();

            let precision = ratio(tp, predicted as f64);
            let recall = ratio(tp, support as f64);
            let f1 = ratio(2.0 * precision * recall, precision + recall);
            classes.push(ClassMetrics {
                label: labels
                    .get(class)
                    .map(|label| label.to_string())
                    .unwrap_or_else(|| class.to_string()),
                precision,
                recall,
                f1,
                support,
            });
        }

        let total = matrix.total();
        let n = k.max(1) as f64;
        let macro_avg = ClassMetrics {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };
        let weight = |c: &ClassMetrics| ratio(c.support as f64, total as f64);
        let weighted_avg = ClassMetrics {
            label: "weighted avg".to_string(),
            precision: classes.iter().map(|c| c.precision * weight(c)).sum(),
            recall: classes.iter().map(|c| c.recall * weight(c)).sum(),
            f1: classes.iter().map(|c| c.f1 * weight(c)).sum(),
            support: total,
        };

        Self {
            classes,
            accuracy: ratio(correct as f64, total as f64),
            macro_avg,
            weighted_avg,
        }
    }

    /// Report for binary churn predictions (`0` = stay, `1` = churn).
    pub fn binary(truth: &[usize], predicted: &[usize]) -> Self {
        let mut labels = ["", ""];
        labels[STAY] = "0";
        labels[CHURN] = "1";
        let matrix = ConfusionMatrix::from_predictions(2, truth, predicted);
        Self::from_confusion(&matrix, &labels)
    }

    pub fn class(&self, class: usize) -> Option<&ClassMetrics> {
        self.classes.get(class)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for class in &self.classes {
            write_row(f, class)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_row(f, &self.macro_avg)?;
        write_row(f, &self.weighted_avg)
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, m: &ClassMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        m.label, m.precision, m.recall, m.f1, m.support
    )
}
