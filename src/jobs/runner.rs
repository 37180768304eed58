use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::stats::{JobReport, ProcessorStats, HIGH_RISK_SCORE};
use crate::error::JobError;
use crate::ingest::{DecoderGuard, VideoOpener};
use crate::pipeline::{FrameDetectionRecord, FramePipeline};
use crate::storage::{EventStore, NewEvent, VideoStatus, VideoStore};

/// One video to process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    pub video_id: String,
    pub user_id: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunnerSettings {
    /// Score every `stride`-th decoded frame.
    pub stride: u64,
    /// Decoded frames between yield, cancellation and deadline checks.
    pub yield_every: u64,
    pub max_decode: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            stride: 5,
            yield_every: 100,
            max_decode: Duration::from_secs(3600),
        }
    }
}

/// Drives one video at a time through the frame pipeline.
pub struct VideoJobRunner {
    settings: RunnerSettings,
    opener: Arc<dyn VideoOpener>,
    pipeline: FramePipeline,
    events: Arc<dyn EventStore>,
    videos: Arc<dyn VideoStore>,
    stats: Arc<ProcessorStats>,
}

impl VideoJobRunner {
    pub fn new(
        settings: RunnerSettings,
        opener: Arc<dyn VideoOpener>,
        pipeline: FramePipeline,
        events: Arc<dyn EventStore>,
        videos: Arc<dyn VideoStore>,
    ) -> Self {
        Self {
            settings: RunnerSettings {
                stride: settings.stride.max(1),
                yield_every: settings.yield_every.max(1),
                ..settings
            },
            opener,
            pipeline,
            events,
            videos,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    /// Share processor statistics with another owner (e.g. the service facade).
    pub fn with_stats(mut self, stats: Arc<ProcessorStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }

    /// Process a job end to end and move the video through
    /// `processing` to `completed` or `failed`.
    pub fn run(&mut self, job: &VideoJob, cancel: &AtomicBool) -> Result<JobReport, JobError> {
        log::info!(
            "starting video {} ({}, scorer {})",
            job.video_id,
            job.path,
            self.pipeline.scorer_name()
        );
        self.set_status(&job.video_id, VideoStatus::Processing);

        match self.process(job, cancel) {
            Ok(report) => {
                self.set_status(&job.video_id, VideoStatus::Completed);
                self.stats.record_completed(&report);
                log::info!(
                    "completed video {}: {} frames scored, {} anomalies, {} events ({} failed) in {:.2}s",
                    job.video_id,
                    report.frames_scored,
                    report.anomalies,
                    report.events_persisted,
                    report.events_failed,
                    report.processing_secs
                );
                Ok(report)
            }
            Err(e) => {
                self.set_status(&job.video_id, VideoStatus::Failed);
                self.stats.record_failed();
                log::error!("video {} failed: {}", job.video_id, e);
                Err(e)
            }
        }
    }

    /// Mark a job that will never run as failed.
    pub fn abandon(&self, job: &VideoJob) {
        self.set_status(&job.video_id, VideoStatus::Failed);
        self.stats.record_failed();
    }

    fn process(&mut self, job: &VideoJob, cancel: &AtomicBool) -> Result<JobReport, JobError> {
        let started = Instant::now();
        let decoder = self
            .opener
            .open(&job.path, &job.video_id)
            .map_err(|source| JobError::Open {
                path: job.path.clone(),
                source,
            })?;
        let mut decoder = DecoderGuard::new(decoder);
        let meta = decoder.metadata().clone();

        let mut records: Vec<FrameDetectionRecord> = Vec::new();
        let mut decoded: u64 = 0;
        loop {
            let frame = match decoder.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(source) => {
                    return Err(JobError::Decode {
                        frame_number: decoded,
                        source,
                    })
                }
            };

            if decoded % self.settings.stride == 0 {
                records.push(self.pipeline.process(
                    &frame,
                    decoded,
                    &job.video_id,
                    &job.user_id,
                    meta.fps,
                ));
            }
            drop(frame);
            decoded += 1;

            if decoded % self.settings.yield_every == 0 {
                thread::yield_now();
                if meta.frame_count > 0 {
                    log::info!(
                        "video {}: {}/{} frames ({:.1}%)",
                        job.video_id,
                        decoded,
                        meta.frame_count,
                        decoded as f64 * 100.0 / meta.frame_count as f64
                    );
                } else {
                    log::info!("video {}: {} frames", job.video_id, decoded);
                }
                if cancel.load(Ordering::SeqCst) {
                    return Err(JobError::Cancelled {
                        frames_decoded: decoded,
                    });
                }
                if started.elapsed() > self.settings.max_decode {
                    return Err(JobError::TimedOut {
                        limit_secs: self.settings.max_decode.as_secs(),
                        frames_decoded: decoded,
                    });
                }
            }
        }
        decoder.release();

        let (persisted, failed) = self.persist_events(job, &records);
        Ok(JobReport::summarize(
            &job.video_id,
            decoded,
            records,
            persisted,
            failed,
            started.elapsed(),
        ))
    }

    fn persist_events(&self, job: &VideoJob, records: &[FrameDetectionRecord]) -> (u64, u64) {
        let mut persisted = 0;
        let mut failed = 0;
        for record in records.iter().filter(|r| r.is_anomaly) {
            let event = NewEvent {
                video_id: job.video_id.clone(),
                user_id: job.user_id.clone(),
                event_type: record.anomaly_type.as_str().to_string(),
                anomaly_score: record.anomaly_score,
                confidence: record.confidence,
                timestamp_seconds: record.timestamp_seconds,
                frame_number: record.frame_number,
                description: format!(
                    "Anomaly detected: {} with score {:.2}",
                    record.anomaly_type.as_str(),
                    record.anomaly_score
                ),
                is_alert: record.anomaly_score > HIGH_RISK_SCORE,
            };
            match self.events.create_event(&event) {
                Ok(id) => {
                    persisted += 1;
                    log::debug!(
                        "event {} stored for video {} frame {}",
                        id,
                        job.video_id,
                        record.frame_number
                    );
                }
                Err(e) => {
                    failed += 1;
                    log::warn!(
                        "event for video {} frame {} dropped: {}",
                        job.video_id,
                        record.frame_number,
                        e
                    );
                }
            }
        }
        (persisted, failed)
    }

    fn set_status(&self, video_id: &str, status: VideoStatus) {
        if let Err(e) = self.videos.update_status(video_id, status) {
            log::warn!(
                "status '{}' for video {} not recorded: {}",
                status.as_str(),
                video_id,
                e
            );
        }
    }
}
