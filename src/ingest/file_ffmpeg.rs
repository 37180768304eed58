//! Local file decoder using FFmpeg.
//!
//! Frames are converted to packed RGB24 in memory and handed over one at a time.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::{VideoDecoder, VideoMetadata};
use crate::frame::{Frame, NOMINAL_FPS};

pub(crate) struct FfmpegDecoder {
    path: String,
    video_id: String,
    meta: VideoMetadata,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    next_index: u64,
    eof_sent: bool,
    released: bool,
}

impl FfmpegDecoder {
    pub(crate) fn open(path: &str, video_id: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();

        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 && rate.numerator() > 0 {
            f64::from(rate)
        } else {
            NOMINAL_FPS
        };
        let frame_count = input_stream.frames().max(0) as u64;

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let duration_secs = if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            frame_count as f64 / fps
        };
        let meta = VideoMetadata {
            frame_count,
            fps,
            width: decoder.width(),
            height: decoder.height(),
            duration_secs,
        };
        log::info!(
            "opened {} (ffmpeg, {}x{} @ {:.2} fps, {} frames)",
            path,
            meta.width,
            meta.height,
            meta.fps,
            meta.frame_count
        );

        Ok(Self {
            path: path.to_string(),
            video_id: video_id.to_string(),
            meta,
            input,
            stream_index,
            decoder,
            scaler,
            next_index: 0,
            eof_sent: false,
            released: false,
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn emit(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let frame = Frame::new(
            pixels,
            width,
            height,
            self.next_index,
            self.video_id.as_str(),
            self.meta.fps,
        );
        self.next_index += 1;
        Ok(frame)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn metadata(&self) -> &VideoMetadata {
        &self.meta
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        if self.released {
            anyhow::bail!("decoder for {} already released", self.path);
        }
        let mut decoded = ffmpeg::frame::Video::empty();

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.emit(&decoded).map(Some);
        }
        if self.eof_sent {
            return Ok(None);
        }

        while let Some(packet) = self.next_packet() {
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.emit(&decoded).map(Some);
            }
        }

        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.emit(&decoded).map(Some);
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.released = true;
        log::debug!(
            "released ffmpeg decoder for {} after {} frames",
            self.path,
            self.next_index
        );
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
