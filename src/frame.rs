//! Ephemeral decoded frames.
//!
//! - `Frame`: one decoded RGB frame plus where it came from (video id, index, timestamp).
//!
//! Frames are consumed by the frame pipeline and dropped right after scoring. They are
//! never persisted, never serialized, and their pixel bytes are zeroized on drop so a
//! decoded surveillance image does not linger in freed memory.

use zeroize::Zeroize;

use crate::error::InvalidFrameError;

/// Channels per pixel for decoded frames (packed RGB24).
pub const RGB_CHANNELS: usize = 3;

/// Frame rate assumed when a container reports none.
pub const NOMINAL_FPS: f64 = 30.0;

/// One decoded frame. Not `Clone` and not `Serialize`.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Zero-based index of this frame in its source video.
    pub index: u64,

    /// Identifier of the source video.
    pub video_id: String,

    /// `index / fps` seconds from the start of the video.
    pub timestamp_seconds: f64,
}

impl Frame {
    /// Wrap decoded RGB24 pixels. Shape is checked lazily by `validate`, so decoders can
    /// hand over whatever they produced and the scorer decides whether it is usable.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        video_id: impl Into<String>,
        fps: f64,
    ) -> Self {
        let fps = if fps > 0.0 { fps } else { NOMINAL_FPS };
        Self {
            data,
            width,
            height,
            index,
            video_id: video_id.into(),
            timestamp_seconds: index as f64 / fps,
        }
    }

    /// Read-only pixel access for scorers and feature extraction.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Expected byte length for the declared dimensions, if it does not overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
    }

    /// Check the pixel buffer against the declared shape.
    pub fn validate(&self) -> Result<(), InvalidFrameError> {
        if self.data.is_empty() {
            return Err(InvalidFrameError::Empty {
                frame_index: self.index,
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(InvalidFrameError::ZeroDimension {
                frame_index: self.index,
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len().unwrap_or(usize::MAX);
        if self.data.len() != expected {
            return Err(InvalidFrameError::ShapeMismatch {
                frame_index: self.index,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Frame {
    // Pixel bytes are deliberately left out.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("video_id", &self.video_id)
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_seconds", &self.timestamp_seconds)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}
