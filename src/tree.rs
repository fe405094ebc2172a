//! Binary classification tree grown with the Gini criterion
//!
//! Every choice the fit makes is a pure function of the rows, the candidate
//! features and the seeded RNG: candidate splits are scanned in column order
//! over rows sorted by `(value, row index)`, and only a strictly lower impurity
//! replaces the current best. Two fits with the same inputs and seed produce
//! identical trees.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::model::{CHURN, STAY};

/// Growth limits of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    /// Candidate columns drawn at every split; `None` scans all columns.
    pub max_features: Option<usize>,
    pub min_samples_split: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            max_features: None,
            min_samples_split: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        /// Share of churned training rows that reached the leaf.
        churn_fraction: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A fitted tree; rows with `value <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationTree {
    n_features: usize,
    root: Node,
}

fn class_counts(targets: &[usize], rows: &[usize]) -> [usize; 2] {
    let mut counts = [0usize; 2];
    for &row in rows {
        counts[usize::from(targets[row] == CHURN)] += 1;
    }
    counts
}

fn gini(counts: [usize; 2]) -> f64 {
    let total = (counts[STAY] + counts[CHURN]) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let p = counts[CHURN] as f64 / total;
    2.0 * p * (1.0 - p)
}

fn leaf(counts: [usize; 2]) -> Node {
    let total = counts[STAY] + counts[CHURN];
    let churn_fraction = if total == 0 {
        0.0
    } else {
        counts[CHURN] as f64 / total as f64
    };
    Node::Leaf { churn_fraction }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct Grower<'a> {
    features: &'a Array2<f64>,
    targets: &'a [usize],
    params: TreeParams,
    rng: &'a mut StdRng,
}

impl Grower<'_> {
    fn candidate_features(&mut self) -> Vec<usize> {
        let n_features = self.features.ncols();
        match self.params.max_features {
            Some(k) if k < n_features => {
                let mut columns =
                    rand::seq::index::sample(&mut *self.rng, n_features, k.max(1)).into_vec();
                columns.sort_unstable();
                columns
            }
            _ => (0..n_features).collect(),
        }
    }

    fn best_split(&mut self, rows: &[usize], counts: [usize; 2]) -> Option<BestSplit> {
        let n = rows.len() as f64;
        let mut best: Option<BestSplit> = None;
        let mut sorted = rows.to_vec();

        for feature in self.candidate_features() {
            let column = self.features.column(feature);
            sorted.sort_by(|&a, &b| column[a].total_cmp(&column[b]).then(a.cmp(&b)));

            let mut left = [0usize; 2];
            for i in 0..sorted.len() - 1 {
                left[usize::from(self.targets[sorted[i]] == CHURN)] += 1;
                let (here, next) = (column[sorted[i]], column[sorted[i + 1]]);
                if here == next {
                    continue;
                }
                let right = [counts[STAY] - left[STAY], counts[CHURN] - left[CHURN]];
                let n_left = (i + 1) as f64;
                let impurity = (n_left * gini(left) + (n - n_left) * gini(right)) / n;
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        impurity,
                    });
                }
            }
        }
        best
    }

    fn grow(&mut self, rows: &[usize], depth: usize) -> Node {
        let counts = class_counts(self.targets, rows);
        let pure = counts[STAY] == 0 || counts[CHURN] == 0;
        let too_deep = self.params.max_depth.is_some_and(|max| depth >= max);
        if pure || too_deep || rows.len() < self.params.min_samples_split.max(2) {
            return leaf(counts);
        }

        let Some(split) = self.best_split(rows, counts) else {
            return leaf(counts);
        };
        if split.impurity >= gini(counts) {
            return leaf(counts);
        }

        let column = self.features.column(split.feature);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().copied().partition(|&row| column[row] <= split.threshold);
        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(&left_rows, depth + 1)),
            right: Box::new(self.grow(&right_rows, depth + 1)),
        }
    }
}

impl ClassificationTree {
    /// Grow a tree on `rows` of `features`; rows may repeat (bootstrap).
    pub fn fit(
        features: &Array2<f64>,
        targets: &[usize],
        rows: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut grower = Grower {
            features,
            targets,
            params,
            rng,
        };
        let root = grower.grow(rows, 0);
        Self {
            n_features: features.ncols(),
            root,
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn depth(&self) -> usize {
        fn depth_of(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + depth_of(left).max(depth_of(right)),
            }
        }
        depth_of(&self.root)
    }

    /// Churn fraction of the leaf `row` falls into.
    pub fn churn_fraction(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { churn_fraction } => return *churn_fraction,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn all_rows(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_single_threshold_is_found() {
        let features = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let targets = [0, 0, 0, 1, 1, 1];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = ClassificationTree::fit(
            &features,
            &targets,
            &all_rows(6),
            TreeParams::default(),
            &mut rng,
        );

        assert_eq!(tree.depth(), 1);
        assert_eq!(
            tree.root,
            Node::Split {
                feature: 0,
                threshold: 6.5,
                left: Box::new(Node::Leaf { churn_fraction: 0.0 }),
                right: Box::new(Node::Leaf { churn_fraction: 1.0 }),
            }
        );
        assert_eq!(tree.churn_fraction(array![4.0].view()), 0.0);
        assert_eq!(tree.churn_fraction(array![9.0].view()), 1.0);
    }

    #[test]
    fn test_max_depth_yields_mixed_leaf() {
        let features = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        let targets = [0, 1, 1, 0];
        let params = TreeParams {
            max_depth: Some(0),
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = ClassificationTree::fit(&features, &targets, &all_rows(4), params, &mut rng);

        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.churn_fraction(array![0.0, 0.0].view()), 0.5);
    }

    #[test]
    fn test_constant_features_make_a_leaf() {
        let features = array![[5.0], [5.0], [5.0]];
        let targets = [0, 1, 1];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = ClassificationTree::fit(
            &features,
            &targets,
            &all_rows(3),
            TreeParams::default(),
            &mut rng,
        );
        assert_eq!(tree.depth(), 0);
        assert!((tree.churn_fraction(array![5.0].view()) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_equal_gain_ties_keep_lowest_column() {
        // Both columns separate the classes perfectly.
        let features = array![[0.0, 0.0], [0.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let targets = [0, 0, 1, 1];
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let tree = ClassificationTree::fit(
                &features,
                &targets,
                &all_rows(4),
                TreeParams::default(),
                &mut rng,
            );
            match &tree.root {
                Node::Split { feature, .. } => assert_eq!(*feature, 0),
                other => panic!("expected a split, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_repeated_bootstrap_rows_are_counted() {
        let features = array![[0.0], [1.0]];
        let targets = [0, 1];
        let rows = [0, 0, 0, 1];
        let params = TreeParams {
            max_depth: Some(0),
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = ClassificationTree::fit(&features, &targets, &rows, params, &mut rng);
        assert!((tree.churn_fraction(array![0.0].view()) - 0.25).abs() < 1e-12);
    }
}
