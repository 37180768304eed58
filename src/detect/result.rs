use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detect::features::{FEATURE_DIM, PERSISTED_FEATURE_DIM};
use crate::error::InvalidFrameError;

/// Lower confidence bound for scorer verdicts.
pub const MIN_CONFIDENCE: f64 = 0.5;
/// Upper confidence bound for scorer verdicts.
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Result of scoring one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// How unusual the frame is, in [0, 1].
    pub anomaly_score: f64,
    /// Verdict against the scorer's internal threshold.
    pub is_anomaly: bool,
    /// Certainty of the verdict, in [0.5, 0.95].
    pub confidence: f64,
}

impl DetectionResult {
    /// Apply an internal threshold to a raw score.
    ///
    /// Confidence grows with the distance between score and threshold and is clamped
    /// to `[MIN_CONFIDENCE, MAX_CONFIDENCE]`.
    pub fn from_score(score: f64, internal_threshold: f64) -> Self {
        let anomaly_score = score.clamp(0.0, 1.0);
        let confidence =
            ((anomaly_score - internal_threshold).abs() * 1.5).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        Self {
            anomaly_score,
            is_anomaly: anomaly_score > internal_threshold,
            confidence,
        }
    }
}

/// Fixed-length frame summary used as a retrieval key.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Result<Self, InvalidFrameError> {
        if values.len() != FEATURE_DIM {
            return Err(InvalidFrameError::FeatureDimension {
                expected: FEATURE_DIM,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// The prefix kept alongside persisted records.
    pub fn truncated(&self) -> Vec<f32> {
        self.values[..PERSISTED_FEATURE_DIM].to_vec()
    }

    /// Stable key for the retrieval cache.
    pub fn cache_key(&self) -> u64 {
        let mut hasher = Sha256::new();
        for value in &self.values {
            hasher.update(value.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(key)
    }
}
