//! Typed failures at the semantic seams of the core.
//!
//! Plumbing (stores, config, I/O) reports `anyhow::Error`. The enums here separate
//! what a caller may recover from (a degraded frame, a fallback analysis) from what
//! aborts a job or must reach the operator (a lost controller update).

use thiserror::Error;

/// Malformed frame input. Fails the single frame, never the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFrameError {
    #[error("frame {frame_index} has an empty pixel buffer")]
    Empty { frame_index: u64 },

    #[error("frame {frame_index} has a zero dimension ({width}x{height})")]
    ZeroDimension {
        frame_index: u64,
        width: u32,
        height: u32,
    },

    #[error("frame {frame_index} expected {expected} bytes, received {actual}")]
    ShapeMismatch {
        frame_index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("feature vector has {actual} dimensions, expected {expected}")]
    FeatureDimension { expected: usize, actual: usize },
}

/// A per-frame failure. The pipeline turns these into degraded records.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidFrame(#[from] InvalidFrameError),

    #[error("scorer '{backend}' failed: {message}")]
    Scorer {
        backend: &'static str,
        message: String,
    },
}

/// Fatal job failure. The job is marked `failed` and the decoder released.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to open video '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("decode failed at frame {frame_number}: {source}")]
    Decode {
        frame_number: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("job cancelled after {frames_decoded} frames")]
    Cancelled { frames_decoded: u64 },

    #[error("decode exceeded {limit_secs}s after {frames_decoded} frames")]
    TimedOut { limit_secs: u64, frames_decoded: u64 },

    #[error("job queue unavailable: {0}")]
    Queue(String),
}

/// Threshold controller failures. These are never swallowed.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("feedback score {0} is outside [-1, 1]")]
    InvalidFeedback(f64),

    #[error("training journal write failed after {attempts} attempts: {source}")]
    Journal {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("controller state lock poisoned")]
    LockPoisoned,
}

/// Failures surfaced by the feedback ingress.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback score {0} is outside [-1, 1]")]
    InvalidScore(f64),

    #[error("event {0} not found")]
    EventNotFound(i64),

    #[error("user '{user_id}' may not give feedback on event {event_id}")]
    AccessDenied { event_id: i64, user_id: String },

    #[error("event store failure: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Failures of the service facade's read paths.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("video {0} not found")]
    VideoNotFound(String),

    #[error("user '{user_id}' may not access video {video_id}")]
    AccessDenied { video_id: String, user_id: String },

    #[error("store failure: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Result of a best-effort enrichment step.
///
/// `Fallback` carries a usable value plus the reason the computed path was skipped,
/// so the caller sees the degradation in the type instead of in a log line only.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment<T> {
    Computed(T),
    Fallback { value: T, reason: String },
}

impl<T> Enrichment<T> {
    pub fn value(&self) -> &T {
        match self {
            Enrichment::Computed(value) => value,
            Enrichment::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Enrichment::Computed(value) => value,
            Enrichment::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Enrichment::Fallback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_exposes_value_for_both_variants() {
        let computed = Enrichment::Computed(3);
        let fallback = Enrichment::Fallback {
            value: 5,
            reason: "lock poisoned".to_string(),
        };
        assert_eq!(*computed.value(), 3);
        assert!(!computed.is_fallback());
        assert!(fallback.is_fallback());
        assert_eq!(fallback.into_value(), 5);
    }

    #[test]
    fn invalid_frame_messages_name_the_frame() {
        let err = InvalidFrameError::ShapeMismatch {
            frame_index: 7,
            expected: 12,
            actual: 4,
        };
        assert_eq!(err.to_string(), "frame 7 expected 12 bytes, received 4");
    }
}
