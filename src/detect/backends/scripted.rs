use crate::detect::backend::AnomalyScorer;
use crate::detect::result::DetectionResult;
use crate::error::InvalidFrameError;
use crate::frame::Frame;

type ScoreFn = Box<dyn Fn(u64) -> f64 + Send>;

/// Scorer driven by a function of the frame index.
///
/// Used by the demo binary and tests to produce a known anomaly pattern independent
/// of pixel content. Frames are still validated.
pub struct ScriptedScorer {
    threshold: f64,
    script: ScoreFn,
}

impl ScriptedScorer {
    pub fn new<F>(threshold: f64, script: F) -> Self
    where
        F: Fn(u64) -> f64 + Send + 'static,
    {
        Self {
            threshold,
            script: Box::new(script),
        }
    }
}

impl AnomalyScorer for ScriptedScorer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn score(&mut self, frame: &Frame) -> Result<DetectionResult, InvalidFrameError> {
        frame.validate()?;
        Ok(DetectionResult::from_score(
            (self.script)(frame.index),
            self.threshold,
        ))
    }
}
