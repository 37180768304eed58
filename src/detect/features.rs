use crate::detect::result::FeatureVector;
use crate::error::InvalidFrameError;
use crate::frame::{Frame, RGB_CHANNELS};

/// Dimensions of a frame feature vector.
pub const FEATURE_DIM: usize = 100;

/// Dimensions kept when a record is persisted.
pub const PERSISTED_FEATURE_DIM: usize = 50;

const HISTOGRAM_BINS: usize = 64;
const GRID_SIDE: usize = 6;
const MAX_SAMPLES: usize = 65_536;

/// Compute a deterministic feature vector from frame pixels.
///
/// Layout: a normalized 64-bin luma histogram followed by the mean luma of a 6x6
/// grid (row-major, scaled to [0, 1]). Large frames are sampled on a fixed pixel
/// stride so cost stays bounded. Identical pixels always give identical features.
pub fn extract_features(frame: &Frame) -> Result<FeatureVector, InvalidFrameError> {
    frame.validate()?;

    let width = frame.width as usize;
    let height = frame.height as usize;
    let pixel_count = width * height;
    let step = (pixel_count / MAX_SAMPLES).max(1);
    let pixels = frame.pixels();

    let mut histogram = [0u32; HISTOGRAM_BINS];
    let mut cell_sum = [0u64; GRID_SIDE * GRID_SIDE];
    let mut cell_count = [0u32; GRID_SIDE * GRID_SIDE];
    let mut samples = 0u32;

    for p in (0..pixel_count).step_by(step) {
        let offset = p * RGB_CHANNELS;
        let l = luma(pixels[offset], pixels[offset + 1], pixels[offset + 2]);
        histogram[(l as usize * HISTOGRAM_BINS) / 256] += 1;

        let (x, y) = (p % width, p / width);
        let cell = (y * GRID_SIDE / height) * GRID_SIDE + (x * GRID_SIDE / width);
        cell_sum[cell] += l as u64;
        cell_count[cell] += 1;
        samples += 1;
    }

    let mut values = Vec::with_capacity(FEATURE_DIM);
    values.extend(
        histogram
            .iter()
            .map(|&count| count as f32 / samples.max(1) as f32),
    );
    values.extend(cell_sum.iter().zip(cell_count.iter()).map(|(&sum, &n)| {
        if n == 0 {
            0.0
        } else {
            (sum as f64 / n as f64 / 255.0) as f32
        }
    }));

    FeatureVector::new(values)
}

/// Integer BT.601 luma approximation.
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}
