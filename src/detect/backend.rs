use crate::detect::features::extract_features;
use crate::detect::result::{DetectionResult, FeatureVector};
use crate::error::InvalidFrameError;
use crate::frame::Frame;

/// Anomaly scorer trait.
///
/// A scorer turns one frame into an anomaly score, a verdict against its own
/// internal threshold, and a confidence. The internal threshold is independent of
/// the adaptive threshold maintained by the controller.
///
/// Implementations must treat the frame as read-only and must not retain pixels
/// beyond the call.
pub trait AnomalyScorer: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Score a frame. Fails only on malformed input.
    fn score(&mut self, frame: &Frame) -> Result<DetectionResult, InvalidFrameError>;

    /// Summarize the frame as a fixed-length feature vector. Pure in the frame.
    fn extract_features(&self, frame: &Frame) -> Result<FeatureVector, InvalidFrameError> {
        extract_features(frame)
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
