//! Isolation forest inference
//!
//! Standard formulation: the anomaly score of a sample is
//! `2^(-E[h(x)] / c(n))` where `h` is the isolation depth and `c(n)`
//! the average unsuccessful-search path length of a binary search tree
//! with `n` samples. The decision function is `0.5 - score`, negative
//! for anomalies.

use super::artifact::Tree;
use crate::features::FEATURE_COUNT;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Read-only tree ensemble.
pub struct IsolationForest {
    trees: Vec<Tree>,
    subsample_size: u32,
}

impl IsolationForest {
    pub fn new(trees: Vec<Tree>, subsample_size: u32) -> Self {
        Self {
            trees,
            subsample_size,
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Decision value for one standardized sample. More negative means
    /// more anomalous; 0.5 is the theoretical benign ceiling.
    pub fn decision_function(&self, sample: &[f64; FEATURE_COUNT]) -> f64 {
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, sample))
            .sum();
        let mean_depth = total / self.trees.len() as f64;

        let score = 2f64.powf(-mean_depth / average_path_length(self.subsample_size as f64));
        0.5 - score
    }
}

/// Isolation depth of a sample in one tree, with the leaf-size
/// correction for unsplit subsamples.
fn path_length(tree: &Tree, sample: &[f64; FEATURE_COUNT]) -> f64 {
    let mut idx = 0usize;
    let mut depth = 0.0f64;

    loop {
        let node = &tree.nodes[idx];
        if node.is_leaf() {
            return depth + average_path_length(node.size as f64);
        }

        idx = if sample[node.feature as usize] <= node.threshold {
            node.left as usize
        } else {
            node.right as usize
        };
        depth += 1.0;
    }
}

/// Average path length of unsuccessful search in a BST of n nodes.
fn average_path_length(n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}
