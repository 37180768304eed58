//! `VideoAnalytics`: the facade the daemon and the demo drive.
//!
//! It owns the job queue and shares the controller, retriever and stores with the
//! pipeline running on the worker thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::AppConfig;
use crate::context::{ContextRetriever, KnowledgeBaseRetriever, RetrieverStats};
use crate::detect::{AnomalyScorer, ScorerRegistry};
use crate::error::{FeedbackError, ServiceError};
use crate::feedback::{FeedbackIngress, FeedbackRequest};
use crate::ingest::{FileOpener, VideoOpener};
use crate::jobs::{
    JobHandle, JobQueue, ProcessorStatsSnapshot, RunnerSettings, VideoJob, VideoJobRunner,
    HIGH_RISK_SCORE,
};
use crate::pipeline::FramePipeline;
use crate::storage::{EventRecord, EventStore, SqliteStore, VideoRecord, VideoStore};
use crate::threshold::{PerformanceMetrics, ThresholdController, TrainingSummary};

/// Collaborators a `VideoAnalytics` is assembled from.
pub struct AnalyticsParts {
    pub scorer: Box<dyn AnomalyScorer>,
    pub retriever: Arc<dyn ContextRetriever>,
    pub controller: Arc<ThresholdController>,
    pub events: Arc<dyn EventStore>,
    pub videos: Arc<dyn VideoStore>,
    pub opener: Arc<dyn VideoOpener>,
    pub runner: RunnerSettings,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub total_events: usize,
    pub anomaly_types: BTreeMap<String, u64>,
    pub max_anomaly_score: f64,
    pub avg_anomaly_score: f64,
    pub high_risk_events: usize,
}

impl AnalysisSummary {
    pub fn from_events(events: &[EventRecord]) -> Self {
        if events.is_empty() {
            return Self::default();
        }
        let mut anomaly_types = BTreeMap::new();
        let mut max_anomaly_score = f64::MIN;
        let mut total = 0.0;
        let mut high_risk_events = 0;
        for record in events {
            *anomaly_types
                .entry(record.event.event_type.clone())
                .or_insert(0) += 1;
            max_anomaly_score = max_anomaly_score.max(record.event.anomaly_score);
            total += record.event.anomaly_score;
            if record.event.anomaly_score > HIGH_RISK_SCORE {
                high_risk_events += 1;
            }
        }
        Self {
            total_events: events.len(),
            anomaly_types,
            max_anomaly_score,
            avg_anomaly_score: total / events.len() as f64,
            high_risk_events,
        }
    }
}

/// Per-video analysis returned to the owning user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoAnalysis {
    pub video: VideoRecord,
    pub events: Vec<EventRecord>,
    pub summary: AnalysisSummary,
    pub controller_metrics: PerformanceMetrics,
    pub retriever_stats: RetrieverStats,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemStatus {
    pub status: String,
    pub queue_size: usize,
    pub is_processing: bool,
    pub statistics: ProcessorStatsSnapshot,
    pub controller: TrainingSummary,
    pub retriever: RetrieverStats,
    pub current_threshold: f64,
}

pub struct VideoAnalytics {
    queue: JobQueue,
    events: Arc<dyn EventStore>,
    videos: Arc<dyn VideoStore>,
    controller: Arc<ThresholdController>,
    retriever: Arc<dyn ContextRetriever>,
    feedback: FeedbackIngress,
}

impl VideoAnalytics {
    pub fn new(parts: AnalyticsParts) -> Result<Self> {
        let AnalyticsParts {
            scorer,
            retriever,
            controller,
            events,
            videos,
            opener,
            runner,
        } = parts;

        let pipeline = FramePipeline::new(scorer, retriever.clone(), controller.clone());
        let runner = VideoJobRunner::new(runner, opener, pipeline, events.clone(), videos.clone());
        let queue = JobQueue::start(runner)?;
        let feedback = FeedbackIngress::new(events.clone(), controller.clone());

        Ok(Self {
            queue,
            events,
            videos,
            controller,
            retriever,
            feedback,
        })
    }

    /// SQLite-backed service built from static configuration.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&cfg.db_path)?);
        let scorer =
            ScorerRegistry::with_builtin().build(&cfg.scorer.backend, &cfg.scorer_settings())?;
        let retriever = Arc::new(KnowledgeBaseRetriever::new(
            cfg.retriever.cache_capacity,
            cfg.retriever.pattern_cap,
        ));
        let controller = Arc::new(
            ThresholdController::new(cfg.controller_settings())?.with_journal(store.clone()),
        );
        log::info!("video analytics using database {}", cfg.db_path);

        Self::new(AnalyticsParts {
            scorer,
            retriever,
            controller,
            events: store.clone(),
            videos: store,
            opener: Arc::new(FileOpener),
            runner: cfg.runner_settings(),
        })
    }

    /// Register a video for `user_id` and queue it. Returns immediately.
    pub fn submit_video(&self, user_id: &str, path: &str) -> Result<JobHandle, ServiceError> {
        let video_id = self
            .videos
            .register_video(user_id, path)
            .map_err(ServiceError::Store)?;
        let handle = self.queue.submit(VideoJob {
            video_id,
            user_id: user_id.to_string(),
            path: path.to_string(),
        })?;
        Ok(handle)
    }

    /// Store operator feedback and adjust the threshold. Returns the new threshold.
    pub fn provide_feedback(&self, request: &FeedbackRequest) -> Result<f64, FeedbackError> {
        self.feedback.submit(request)
    }

    pub fn video_analysis(
        &self,
        video_id: &str,
        user_id: &str,
    ) -> Result<VideoAnalysis, ServiceError> {
        let video = self
            .videos
            .video(video_id)
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::VideoNotFound(video_id.to_string()))?;
        if video.user_id != user_id {
            log::warn!("user {} denied access to video {}", user_id, video_id);
            return Err(ServiceError::AccessDenied {
                video_id: video_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let events = match self.events.events_for_video(video_id) {
            Ok(events) => events,
            Err(e) => {
                log::warn!("events for video {} unavailable: {}", video_id, e);
                Vec::new()
            }
        };

        Ok(VideoAnalysis {
            summary: AnalysisSummary::from_events(&events),
            video,
            events,
            controller_metrics: self.controller.get_performance_metrics()?,
            retriever_stats: self.retriever.statistics(),
        })
    }

    pub fn system_status(&self) -> Result<SystemStatus, ServiceError> {
        Ok(SystemStatus {
            status: "running".to_string(),
            queue_size: self.queue.queue_size(),
            is_processing: self.queue.is_processing(),
            statistics: self.queue.stats().snapshot(),
            controller: self.controller.get_training_summary()?,
            retriever: self.retriever.statistics(),
            current_threshold: self.controller.get_current_threshold(),
        })
    }

    pub fn controller(&self) -> Arc<ThresholdController> {
        self.controller.clone()
    }

    pub fn events(&self) -> Arc<dyn EventStore> {
        self.events.clone()
    }

    /// Drain queued jobs and stop the worker.
    pub fn shutdown(self) -> Result<()> {
        self.queue.shutdown()
    }
}
