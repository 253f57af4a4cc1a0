//! A small from-scratch isolation forest.
//!
//! No isolation-forest crate exists in the available dependency corpus;
//! this implements the standard algorithm directly (random feature +
//! random split point per internal node, anomaly score from average path
//! length normalized by the expected path length of an unsuccessful BST
//! search) using only `rand` for randomness and `serde` for persistence.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const VECTOR_LEN: usize = 11;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf { size: usize },
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: Node,
    height_limit: usize,
}

impl IsolationTree {
    fn build(data: &[Vec<f64>], height_limit: usize, rng: &mut impl Rng) -> Self {
        Self {
            root: Self::build_node(data, 0, height_limit, rng),
            height_limit,
        }
    }

    fn build_node(data: &[Vec<f64>], depth: usize, height_limit: usize, rng: &mut impl Rng) -> Node {
        if depth >= height_limit || data.len() <= 1 {
            return Node::Leaf { size: data.len() };
        }

        let mut features: Vec<usize> = (0..VECTOR_LEN).collect();
        features.shuffle(rng);

        for &feature in &features {
            let min = data.iter().map(|row| row[feature]).fold(f64::INFINITY, f64::min);
            let max = data
                .iter()
                .map(|row| row[feature])
                .fold(f64::NEG_INFINITY, f64::max);
            if min >= max {
                continue;
            }
            let split = rng.random_range(min..max);
            let left: Vec<Vec<f64>> = data.iter().filter(|row| row[feature] < split).cloned().collect();
            let right: Vec<Vec<f64>> = data.iter().filter(|row| row[feature] >= split).cloned().collect();
            if left.is_empty() || right.is_empty() {
                continue;
            }
            return Node::Split {
                feature,
                value: split,
                left: Box::new(Self::build_node(&left, depth + 1, height_limit, rng)),
                right: Box::new(Self::build_node(&right, depth + 1, height_limit, rng)),
            };
        }

        Node::Leaf { size: data.len() }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        Self::path_length_node(&self.root, sample, 0)
    }

    fn path_length_node(node: &Node, sample: &[f64], depth: usize) -> f64 {
        match node {
            Node::Leaf { size } => depth as f64 + expected_path_length(*size),
            Node::Split { feature, value, left, right } => {
                if sample[*feature] < *value {
                    Self::path_length_node(left, sample, depth + 1)
                } else {
                    Self::path_length_node(right, sample, depth + 1)
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` items
/// (Liu, Ting & Zhou 2008).
fn expected_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * (harmonic(n - 1.0) ) - (2.0 * (n - 1.0) / n)
}

fn harmonic(n: f64) -> f64 {
    // H(n) ~= ln(n) + euler-mascheroni
    const EULER_MASCHERONI: f64 = 0.5772156649015329;
    if n <= 0.0 {
        0.0
    } else {
        n.ln() + EULER_MASCHERONI
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit `n_estimators` trees, each built from a uniform subsample of
    /// `max_samples` rows (or all rows, whichever is smaller).
    pub fn fit(data: &[Vec<f64>], n_estimators: usize, max_samples: usize, seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let sample_size = max_samples.min(data.len()).max(1);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..n_estimators)
            .map(|_| {
                let mut indices: Vec<usize> = (0..data.len()).collect();
                indices.shuffle(&mut rng);
                let subsample: Vec<Vec<f64>> =
                    indices.into_iter().take(sample_size).map(|i| data[i].clone()).collect();
                IsolationTree::build(&subsample, height_limit, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Average normalized path length across all trees for `sample`,
    /// mapped into a decision value where more negative is more anomalous
    /// (mirrors scikit-learn's `IsolationForest.decision_function`).
    pub fn decision_function(&self, sample: &[f64]) -> f64 {
        let avg_path_length = self
            .trees
            .iter()
            .map(|t| t.path_length(sample))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c = expected_path_length(self.sample_size);
        let anomaly_score = 2f64.powf(-avg_path_length / c.max(1e-9));
        // scikit-learn centers the decision function so that 0.5 anomaly
        // score (the "typical" boundary) maps to roughly 0.
        0.5 - anomaly_score
    }
}

use rand::SeedableRng;

#[cfg(test)]
mod tests {
    use super::*;

    fn normal_point(seed_offset: f64) -> Vec<f64> {
        (0..VECTOR_LEN).map(|i| (i as f64) * 0.1 + seed_offset).collect()
    }

    #[test]
    fn outlier_scores_more_negative_than_inliers() {
        let mut data: Vec<Vec<f64>> = (0..200).map(|i| normal_point(i as f64 * 0.01)).collect();
        let outlier = vec![1000.0; VECTOR_LEN];
        data.push(outlier.clone());

        let forest = IsolationForest::fit(&data, 50, 128, 42);
        let inlier_decision = forest.decision_function(&normal_point(1.0));
        let outlier_decision = forest.decision_function(&outlier);

        assert!(
            outlier_decision < inlier_decision,
            "outlier ({outlier_decision}) should be more anomalous than inlier ({inlier_decision})"
        );
    }

    #[test]
    fn deterministic_given_seed() {
        let data: Vec<Vec<f64>> = (0..100).map(|i| normal_point(i as f64 * 0.01)).collect();
        let a = IsolationForest::fit(&data, 10, 64, 7);
        let b = IsolationForest::fit(&data, 10, 64, 7);
        let sample = normal_point(0.5);
        assert_eq!(a.decision_function(&sample), b.decision_function(&sample));
    }
}
