//! Anomaly scoring - isolation forest inference
//!
//! The model is trained offline and shipped as a JSON artifact holding
//! the tree ensemble plus the population mean/std used to standardize
//! features. Scoring follows the usual isolation forest convention:
//! more negative decision values are more anomalous.

pub mod artifact;
pub mod forest;

use std::path::Path;

use thiserror::Error;
use tracing::info;

pub use artifact::{ModelArtifact, Node, ScalerParams, Tree};
pub use forest::IsolationForest;

use crate::features::{FeatureVector, FEATURE_COUNT};

/// Startup-fatal model problems.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model artifact is corrupt: {0}")]
    Corrupt(String),

    #[error("model feature contract mismatch: expected {expected:?}, artifact has {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Per-flow scoring failures. Fail-open: the flow is treated as benign.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("feature {0} is not finite")]
    NonFiniteFeature(&'static str),
}

/// Scoring outcome for one flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub score: f64,
    pub is_anomaly: bool,
}

/// Loaded model plus decision threshold. Read-only after construction;
/// safe to share across worker threads.
pub struct AnomalyScorer {
    forest: IsolationForest,
    scaler: ScalerParams,
    threshold: f64,
}

impl AnomalyScorer {
    /// Load the artifact and validate it against the feature contract.
    pub fn load(path: &Path, threshold: f64) -> Result<Self, ModelError> {
        let artifact = ModelArtifact::load(path)?;
        let scorer = Self::from_artifact(artifact, threshold)?;

        info!(
            "Model loaded from {:?}: {} trees, threshold {}",
            path,
            scorer.forest.tree_count(),
            threshold
        );
        Ok(scorer)
    }

    /// Build a scorer from an in-memory artifact.
    pub fn from_artifact(artifact: ModelArtifact, threshold: f64) -> Result<Self, ModelError> {
        artifact.validate()?;

        Ok(Self {
            forest: IsolationForest::new(artifact.trees, artifact.subsample_size),
            scaler: artifact.scaler.sanitized(),
            threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score one flow: standardize, run the ensemble, apply the
    /// threshold.
    pub fn score(&self, features: &FeatureVector) -> Result<Verdict, ScoreError> {
        let raw = features.as_array();

        let mut scaled = [0.0f64; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            scaled[i] = (raw[i] - self.scaler.mean[i]) / self.scaler.std[i];
            if !scaled[i].is_finite() {
                return Err(ScoreError::NonFiniteFeature(
                    crate::features::FEATURE_NAMES[i],
                ));
            }
        }

        let score = self.forest.decision_function(&scaled);

        Ok(Verdict {
            score,
            is_anomaly: score < self.threshold,
        })
    }
}
