//! Serialized model artifact
//!
//! JSON schema produced by the offline training pipeline. The feature
//! name list and the scaler statistics are part of the artifact so the
//! serving side can refuse a model trained against a different
//! contract.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ModelError;
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};

/// One node of an isolation tree. `feature < 0` marks a leaf; `size`
/// is the number of training samples that reached the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub feature: i16,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub size: u32,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

/// A single isolation tree, nodes in preorder with index links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

/// Standardization statistics fitted on the training population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl ScalerParams {
    /// Replace degenerate deviations with 1.0 so constant features
    /// pass through unscaled instead of dividing by zero.
    pub fn sanitized(mut self) -> Self {
        for s in &mut self.std {
            if !s.is_finite() || *s <= 0.0 {
                *s = 1.0;
            }
        }
        self
    }
}

/// The complete on-disk model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub scaler: ScalerParams,
    /// Subsample size each tree was grown from
    pub subsample_size: u32,
    pub trees: Vec<Tree>,
}

impl ModelArtifact {
    /// Read and parse the artifact file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_json::from_str(&content)?)
    }

    /// Check structural soundness and the feature contract.
    pub fn validate(&self) -> Result<(), ModelError> {
        let expected: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        if self.feature_names != expected {
            return Err(ModelError::FeatureMismatch {
                expected,
                found: self.feature_names.clone(),
            });
        }

        if self.scaler.mean.len() != FEATURE_COUNT || self.scaler.std.len() != FEATURE_COUNT {
            return Err(ModelError::Corrupt(format!(
                "scaler dimensions {}x{} do not match {} features",
                self.scaler.mean.len(),
                self.scaler.std.len(),
                FEATURE_COUNT
            )));
        }

        if self.trees.is_empty() {
            return Err(ModelError::Corrupt("ensemble has no trees".to_string()));
        }

        if self.subsample_size < 2 {
            return Err(ModelError::Corrupt(format!(
                "subsample size {} too small",
                self.subsample_size
            )));
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ModelError::Corrupt(format!("tree {} is empty", t)));
            }

            for (n, node) in tree.nodes.iter().enumerate() {
                if node.is_leaf() {
                    if node.size == 0 {
                        return Err(ModelError::Corrupt(format!(
                            "tree {} leaf {} has zero size",
                            t, n
                        )));
                    }
                    continue;
                }

                if node.feature as usize >= FEATURE_COUNT {
                    return Err(ModelError::Corrupt(format!(
                        "tree {} node {} splits on unknown feature {}",
                        t, n, node.feature
                    )));
                }

                let len = tree.nodes.len() as i32;
                if node.left < 0 || node.left >= len || node.right < 0 || node.right >= len {
                    return Err(ModelError::Corrupt(format!(
                        "tree {} node {} has out-of-range children",
                        t, n
                    )));
                }
            }
        }

        Ok(())
    }
}
