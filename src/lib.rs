//! AutoVision core
//!
//! Sampled-frame anomaly analytics for uploaded surveillance video.
//!
//! # Architecture
//!
//! A video is decoded frame by frame on a single background worker. Every N-th frame
//! goes through the frame pipeline:
//!
//! 1. **Score**: an `AnomalyScorer` produces a score, a decision and a feature vector.
//! 2. **Enrich**: a `ContextRetriever` attaches known patterns, recommendations and a
//!    keyword analysis. Enrichment is best-effort and never fails the frame.
//! 3. **Record**: the result becomes a `FrameDetectionRecord`; anomalies are stored as events.
//!
//! Operator feedback on stored events drives a Q-learning `ThresholdController` whose
//! threshold is reported alongside each detection.
//!
//! # Module Structure
//!
//! - `frame`: ephemeral decoded frames (pixels are zeroized on drop)
//! - `detect`: scorers, feature extraction, scorer registry
//! - `context`: knowledge base, FIFO cache, retrievers
//! - `threshold`: adaptive threshold controller
//! - `pipeline`: per-frame detection and enrichment
//! - `ingest`: video openers and decoders
//! - `storage`: events, videos and the training journal (SQLite and in-memory)
//! - `jobs`: job runner, FIFO queue, statistics
//! - `feedback`: operator feedback ingress
//! - `service`: the `VideoAnalytics` facade
//! - `config`: static configuration

pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod threshold;

pub use config::AppConfig;
pub use context::{ContextRetriever, FallbackRetriever, KnowledgeBaseRetriever};
pub use detect::{AnomalyScorer, DetectionResult, FeatureVector, ScorerRegistry, ScorerSettings};
pub use error::{
    ControllerError, Enrichment, FeedbackError, InvalidFrameError, JobError, PipelineError,
    ServiceError,
};
pub use feedback::{FeedbackIngress, FeedbackRequest};
pub use frame::Frame;
pub use ingest::{FileOpener, VideoDecoder, VideoMetadata, VideoOpener};
pub use jobs::{JobHandle, JobQueue, JobReport, JobState, VideoJob, VideoJobRunner};
pub use pipeline::{AnomalyType, FrameDetectionRecord, FramePipeline};
pub use service::{AnalyticsParts, SystemStatus, VideoAnalysis, VideoAnalytics};
pub use storage::{EventStore, InMemoryStore, SqliteStore, TrainingJournal, VideoStore};
pub use threshold::{ControllerSettings, Feedback, ThresholdController};
