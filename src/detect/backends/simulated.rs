use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::AnomalyScorer;
use crate::detect::result::DetectionResult;
use crate::error::InvalidFrameError;
use crate::frame::Frame;

const SPIKE_PROBABILITY: f64 = 0.05;
const SPIKE_BOOST: f64 = 0.3;
const WAVE_PERIOD_SECS: f64 = 60.0;

/// Placeholder scorer standing in for a real model.
///
/// Scores follow a one-minute sine wave over video time with uniform noise and an
/// occasional spike, floored at `min_score` and capped at 0.9 before the spike.
/// Seed it for reproducible runs.
pub struct SimulatedScorer {
    threshold: f64,
    min_score: f64,
    rng: StdRng,
}

impl SimulatedScorer {
    pub fn new(threshold: f64, min_score: f64) -> Self {
        Self {
            threshold,
            min_score,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl AnomalyScorer for SimulatedScorer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn score(&mut self, frame: &Frame) -> Result<DetectionResult, InvalidFrameError> {
        frame.validate()?;

        let phase = (frame.timestamp_seconds % WAVE_PERIOD_SECS) / WAVE_PERIOD_SECS;
        let wave = 0.3 + 0.4 * (phase * std::f64::consts::TAU).sin();
        let noise = 0.2 * self.rng.gen::<f64>();
        let mut score = (wave + noise).clamp(self.min_score, 0.9);

        if self.rng.gen::<f64>() < SPIKE_PROBABILITY {
            score = (score + SPIKE_BOOST).min(1.0);
        }

        Ok(DetectionResult::from_score(score, self.threshold))
    }
}
