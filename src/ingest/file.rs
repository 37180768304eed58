//! Local file video source.
//!
//! `FileOpener` opens local video files for sequential decoding:
//! - `stub://name?frames=N&fps=F&width=W&height=H` produces a synthetic video
//! - any other local path is decoded with FFmpeg (feature: ingest-file-ffmpeg)
//!
//! Remote URLs are rejected. Uploads are expected to land on local disk first.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegDecoder;
use super::{VideoDecoder, VideoMetadata, VideoOpener};
use crate::frame::{Frame, RGB_CHANNELS};

const STUB_SCHEME: &str = "stub://";
const SCENE_LENGTH: u64 = 50;

/// Opens local files and `stub://` synthetic sources.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileOpener;

impl VideoOpener for FileOpener {
    fn open(&self, path: &str, video_id: &str) -> Result<Box<dyn VideoDecoder>> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if path.starts_with(STUB_SCHEME) {
            let spec = SyntheticSpec::parse(path)?;
            log::info!("opened {} (synthetic, {} frames)", path, spec.frames);
            return Ok(Box::new(SyntheticDecoder::new(spec, video_id)));
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Box::new(FfmpegDecoder::open(path, video_id)?))
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "file ingestion requires the ingest-file-ffmpeg feature"
            ))
        }
    }
}

/// Parameters of a synthetic `stub://` video.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticSpec {
    pub name: String,
    pub frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Fail with a decode error when this frame index is reached.
    pub fail_at: Option<u64>,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            frames: 300,
            fps: 30.0,
            width: 64,
            height: 48,
            fail_at: None,
        }
    }
}

impl SyntheticSpec {
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("synthetic source must start with {}", STUB_SCHEME))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut spec = SyntheticSpec::default();
        if !name.is_empty() {
            spec.name = name.to_string();
        }
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed synthetic parameter '{}'", pair))?;
            match key {
                "frames" => spec.frames = value.parse()?,
                "fps" => spec.fps = value.parse()?,
                "width" => spec.width = value.parse()?,
                "height" => spec.height = value.parse()?,
                "fail_at" => spec.fail_at = Some(value.parse()?),
                other => return Err(anyhow!("unknown synthetic parameter '{}'", other)),
            }
        }
        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("synthetic dimensions must be non-zero"));
        }
        if !(spec.fps > 0.0) {
            return Err(anyhow!("synthetic fps must be positive"));
        }
        Ok(spec)
    }

    pub fn to_path(&self) -> String {
        let mut path = format!(
            "{}{}?frames={}&fps={}&width={}&height={}",
            STUB_SCHEME, self.name, self.frames, self.fps, self.width, self.height
        );
        if let Some(fail_at) = self.fail_at {
            path.push_str(&format!("&fail_at={}", fail_at));
        }
        path
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticDecoder {
    spec: SyntheticSpec,
    meta: VideoMetadata,
    video_id: String,
    next_index: u64,
    scene_state: u8,
    released: bool,
}

impl SyntheticDecoder {
    fn new(spec: SyntheticSpec, video_id: &str) -> Self {
        let meta = VideoMetadata {
            frame_count: spec.frames,
            fps: spec.fps,
            width: spec.width,
            height: spec.height,
            duration_secs: spec.frames as f64 / spec.fps,
        };
        Self {
            spec,
            meta,
            video_id: video_id.to_string(),
            next_index: 0,
            scene_state: 0,
            released: false,
        }
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.spec.width as usize * self.spec.height as usize * RGB_CHANNELS;
        if self.next_index > 0 && self.next_index % SCENE_LENGTH == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.next_index + self.scene_state as u64 * 64;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + shift) % 256) as u8;
        }
        pixels
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn metadata(&self) -> &VideoMetadata {
        &self.meta
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Err(anyhow!("decoder for {} already released", self.spec.name));
        }
        if self.next_index >= self.spec.frames {
            return Ok(None);
        }
        if self.spec.fail_at == Some(self.next_index) {
            return Err(anyhow!(
                "synthetic decode failure at frame {}",
                self.next_index
            ));
        }

        let pixels = self.generate_synthetic_pixels();
        let frame = Frame::new(
            pixels,
            self.spec.width,
            self.spec.height,
            self.next_index,
            self.video_id.as_str(),
            self.spec.fps,
        );
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released = true;
        log::debug!(
            "released synthetic decoder {} after {} frames",
            self.spec.name,
            self.next_index
        );
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_synthetic_parameters() {
        let spec =
            SyntheticSpec::parse("stub://lobby?frames=12&fps=10&width=8&height=4&fail_at=7")
                .unwrap();
        assert_eq!(spec.name, "lobby");
        assert_eq!(spec.frames, 12);
        assert_eq!(spec.fps, 10.0);
        assert_eq!((spec.width, spec.height), (8, 4));
        assert_eq!(spec.fail_at, Some(7));
        assert_eq!(SyntheticSpec::parse(&spec.to_path()).unwrap(), spec);
    }

    #[test]
    fn rejects_bad_synthetic_parameters() {
        assert!(SyntheticSpec::parse("stub://x?frames=ten").is_err());
        assert!(SyntheticSpec::parse("stub://x?colour=red").is_err());
        assert!(SyntheticSpec::parse("stub://x?width=0").is_err());
        assert!(SyntheticSpec::parse("stub://x?fps=0").is_err());
    }

    #[test]
    fn rejects_remote_urls() {
        assert!(FileOpener.open("rtsp://camera/stream", "v").is_err());
        assert!(FileOpener.open("https://example.com/a.mp4", "v").is_err());
        assert!(FileOpener.open("  ", "v").is_err());
    }

    #[test]
    fn synthetic_decoder_yields_valid_frames_in_order() {
        let mut decoder = FileOpener
            .open("stub://cam?frames=5&fps=10&width=4&height=2", "video-1")
            .unwrap();
        assert_eq!(decoder.metadata().frame_count, 5);
        assert_eq!(decoder.metadata().duration_secs, 0.5);

        let mut indices = Vec::new();
        while let Some(frame) = decoder.read_next().unwrap() {
            frame.validate().unwrap();
            assert_eq!(frame.video_id, "video-1");
            assert_eq!(frame.timestamp_seconds, frame.index as f64 / 10.0);
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        decoder.release();
        assert!(decoder.read_next().is_err());
    }

    #[test]
    fn synthetic_decoder_fails_at_requested_frame() {
        let mut decoder = FileOpener.open("stub://cam?frames=5&fail_at=2", "v").unwrap();
        assert!(decoder.read_next().unwrap().is_some());
        assert!(decoder.read_next().unwrap().is_some());
        assert!(decoder.read_next().is_err());
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn real_files_need_ffmpeg() {
        let err = FileOpener.open("/var/lib/videos/a.mp4", "v").err().unwrap();
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }
}
