use crate::detect::backend::AnomalyScorer;
use crate::detect::features::luma;
use crate::detect::result::DetectionResult;
use crate::error::InvalidFrameError;
use crate::frame::{Frame, RGB_CHANNELS};

const GRID_SIDE: usize = 8;
const MOTION_GAIN: f64 = 4.0;

/// Deterministic scorer based on coarse luma change between consecutive frames.
///
/// Each frame is reduced to an 8x8 grid of mean luma values. The score is the mean
/// absolute change against the previous grid, scaled by `MOTION_GAIN` and clamped to
/// [0, 1]. The first frame of a sequence scores 0.
pub struct LumaScorer {
    threshold: f64,
    last_grid: Option<[f64; GRID_SIDE * GRID_SIDE]>,
}

impl LumaScorer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_grid: None,
        }
    }

    fn grid(frame: &Frame) -> [f64; GRID_SIDE * GRID_SIDE] {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let pixels = frame.pixels();
        let mut sum = [0u64; GRID_SIDE * GRID_SIDE];
        let mut count = [0u32; GRID_SIDE * GRID_SIDE];

        for y in 0..height {
            let row = y * GRID_SIDE / height;
            for x in 0..width {
                let offset = (y * width + x) * RGB_CHANNELS;
                let cell = row * GRID_SIDE + x * GRID_SIDE / width;
                sum[cell] += luma(pixels[offset], pixels[offset + 1], pixels[offset + 2]) as u64;
                count[cell] += 1;
            }
        }

        let mut grid = [0.0; GRID_SIDE * GRID_SIDE];
        for (i, cell) in grid.iter_mut().enumerate() {
            if count[i] > 0 {
                *cell = sum[i] as f64 / count[i] as f64 / 255.0;
            }
        }
        grid
    }
}

impl AnomalyScorer for LumaScorer {
    fn name(&self) -> &'static str {
        "luma"
    }

    fn score(&mut self, frame: &Frame) -> Result<DetectionResult, InvalidFrameError> {
        frame.validate()?;
        let grid = Self::grid(frame);

        let score = match self.last_grid {
            Some(prev) => {
                let change: f64 = grid
                    .iter()
                    .zip(prev.iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    / grid.len() as f64;
                (change * MOTION_GAIN).clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        self.last_grid = Some(grid);
        Ok(DetectionResult::from_score(score, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(index: u64, value: u8) -> Frame {
        Frame::new(vec![value; 16 * 16 * RGB_CHANNELS], 16, 16, index, "luma", 30.0)
    }

    #[test]
    fn luma_scorer_detects_change() {
        let mut scorer = LumaScorer::new(0.5);

        let r1 = scorer.score(&solid(0, 10)).unwrap();
        assert_eq!(r1.anomaly_score, 0.0);
        assert!(!r1.is_anomaly);

        let r2 = scorer.score(&solid(1, 200)).unwrap();
        assert!(r2.is_anomaly);
        assert_eq!(r2.anomaly_score, 1.0);

        let r3 = scorer.score(&solid(2, 200)).unwrap();
        assert_eq!(r3.anomaly_score, 0.0);
    }
}
