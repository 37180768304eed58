//! Video sources.
//!
//! This module provides sequential frame decoders for the job runner:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` sources (testing, demos)
//!
//! A decoder is opened once per job, read front to back, and released exactly once.
//! `DecoderGuard` enforces the release on every exit path, including errors and
//! cancellation.
//!
//! The ingestion layer MUST NOT:
//! - Store decoded frames to disk
//! - Log raw frame content

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileOpener, SyntheticSpec};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Container-level facts about an opened video.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Reported frame count. May be 0 when the container does not know.
    pub frame_count: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

/// Sequential frame decoder.
pub trait VideoDecoder: Send {
    fn metadata(&self) -> &VideoMetadata;

    /// Next frame, or `None` at end of stream.
    fn read_next(&mut self) -> Result<Option<Frame>>;

    /// Free decoder resources. Called exactly once, through `DecoderGuard`.
    fn release(&mut self);
}

pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &str, video_id: &str) -> Result<Box<dyn VideoDecoder>>;
}

/// Owns a decoder and releases it when dropped.
pub struct DecoderGuard {
    decoder: Box<dyn VideoDecoder>,
    released: bool,
}

impl DecoderGuard {
    pub fn new(decoder: Box<dyn VideoDecoder>) -> Self {
        Self {
            decoder,
            released: false,
        }
    }

    pub fn metadata(&self) -> &VideoMetadata {
        self.decoder.metadata()
    }

    pub fn read_next(&mut self) -> Result<Option<Frame>> {
        self.decoder.read_next()
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.decoder.release();
        }
    }
}

impl Drop for DecoderGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingDecoder {
        meta: VideoMetadata,
        releases: Arc<AtomicU32>,
    }

    impl VideoDecoder for CountingDecoder {
        fn metadata(&self) -> &VideoMetadata {
            &self.meta
        }

        fn read_next(&mut self) -> Result<Option<Frame>> {
            Ok(None)
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_releases_once() {
        let releases = Arc::new(AtomicU32::new(0));
        {
            let mut guard = DecoderGuard::new(Box::new(CountingDecoder {
                meta: VideoMetadata {
                    frame_count: 0,
                    fps: 30.0,
                    width: 1,
                    height: 1,
                    duration_secs: 0.0,
                },
                releases: releases.clone(),
            }));
            assert!(guard.read_next().unwrap().is_none());
            guard.release();
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
