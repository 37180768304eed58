//! Per-frame detection and enrichment.
//!
//! `FramePipeline::process` runs scorer, feature extraction, context analysis and
//! retrieval for one sampled frame and reads the controller threshold for reporting.
//! It never fails: any per-frame error becomes a degraded record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{
    generate_summary, AnalysisResult, ContextResult, ContextRetriever, PatternMetadata,
};
use crate::detect::{AnomalyScorer, DetectionResult};
use crate::error::PipelineError;
use crate::frame::{Frame, NOMINAL_FPS};
use crate::threshold::ThresholdController;

/// Score-banded event category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Normal,
    Loitering,
    Running,
    CrowdGathering,
    Intrusion,
    Fighting,
    /// Frame could not be processed.
    Unknown,
}

impl AnomalyType {
    /// Fixed bands: `<0.3` normal, `<0.5` loitering, `<0.7` running,
    /// `<0.8` crowd gathering, `<0.9` intrusion, otherwise fighting.
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            AnomalyType::Normal
        } else if score < 0.5 {
            AnomalyType::Loitering
        } else if score < 0.7 {
            AnomalyType::Running
        } else if score < 0.8 {
            AnomalyType::CrowdGathering
        } else if score < 0.9 {
            AnomalyType::Intrusion
        } else {
            AnomalyType::Fighting
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Normal => "normal",
            AnomalyType::Loitering => "loitering",
            AnomalyType::Running => "running",
            AnomalyType::CrowdGathering => "crowd_gathering",
            AnomalyType::Intrusion => "intrusion",
            AnomalyType::Fighting => "fighting",
            AnomalyType::Unknown => "unknown",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            AnomalyType::Normal => "Normal",
            AnomalyType::Loitering => "Loitering",
            AnomalyType::Running => "Running",
            AnomalyType::CrowdGathering => "Crowd Gathering",
            AnomalyType::Intrusion => "Intrusion",
            AnomalyType::Fighting => "Fighting",
            AnomalyType::Unknown => "Unknown",
        }
    }
}

/// Everything known about one sampled frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameDetectionRecord {
    pub frame_number: u64,
    pub timestamp_seconds: f64,
    pub video_id: String,
    pub user_id: String,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub anomaly_type: AnomalyType,
    /// Scorer confidence blended with the analysis confidence.
    pub confidence: f64,
    pub original_confidence: f64,
    /// Controller threshold at read time.
    pub threshold_used: f64,
    pub description: String,
    pub summary: String,
    pub context: Option<ContextResult>,
    pub analysis: Option<AnalysisResult>,
    /// True when retrieval or analysis answered with a fallback.
    pub enrichment_fallback: bool,
    /// Persisted prefix of the feature vector.
    pub features: Vec<f32>,
    pub error: Option<String>,
}

impl FrameDetectionRecord {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    fn degraded(
        frame_number: u64,
        timestamp_seconds: f64,
        video_id: &str,
        user_id: &str,
        threshold_used: f64,
        error: &PipelineError,
    ) -> Self {
        Self {
            frame_number,
            timestamp_seconds,
            video_id: video_id.to_string(),
            user_id: user_id.to_string(),
            anomaly_score: 0.0,
            is_anomaly: false,
            anomaly_type: AnomalyType::Unknown,
            confidence: 0.0,
            original_confidence: 0.0,
            threshold_used,
            description: String::new(),
            summary: String::new(),
            context: None,
            analysis: None,
            enrichment_fallback: false,
            features: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

pub struct FramePipeline {
    scorer: Box<dyn AnomalyScorer>,
    retriever: Arc<dyn ContextRetriever>,
    controller: Arc<ThresholdController>,
}

impl FramePipeline {
    pub fn new(
        scorer: Box<dyn AnomalyScorer>,
        retriever: Arc<dyn ContextRetriever>,
        controller: Arc<ThresholdController>,
    ) -> Self {
        log::info!(
            "frame pipeline ready (scorer {}, retriever {})",
            scorer.name(),
            retriever.name()
        );
        Self {
            scorer,
            retriever,
            controller,
        }
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub fn process(
        &mut self,
        frame: &Frame,
        frame_number: u64,
        video_id: &str,
        user_id: &str,
        fps: f64,
    ) -> FrameDetectionRecord {
        let fps = if fps > 0.0 { fps } else { NOMINAL_FPS };
        let timestamp_seconds = frame_number as f64 / fps;

        match self.try_process(frame, frame_number, timestamp_seconds, video_id, user_id) {
            Ok(record) => record,
            Err(e) => {
                log::error!("frame {} of {} degraded: {}", frame_number, video_id, e);
                FrameDetectionRecord::degraded(
                    frame_number,
                    timestamp_seconds,
                    video_id,
                    user_id,
                    self.controller.get_current_threshold(),
                    &e,
                )
            }
        }
    }

    fn try_process(
        &mut self,
        frame: &Frame,
        frame_number: u64,
        timestamp_seconds: f64,
        video_id: &str,
        user_id: &str,
    ) -> Result<FrameDetectionRecord, PipelineError> {
        let detection = self.scorer.score(frame)?;
        if !detection.anomaly_score.is_finite() || !detection.confidence.is_finite() {
            return Err(PipelineError::Scorer {
                backend: self.scorer.name(),
                message: format!("non-finite score {}", detection.anomaly_score),
            });
        }
        let features = self.scorer.extract_features(frame)?;

        let anomaly_type = AnomalyType::from_score(detection.anomaly_score);
        let description = describe(anomaly_type, &detection);

        let analysis = self.retriever.analyze(
            &description,
            detection.anomaly_score,
            anomaly_type.as_str(),
        );
        let context = self
            .retriever
            .retrieve(&features, detection.anomaly_score);
        let enrichment_fallback = analysis.is_fallback() || context.is_fallback();
        let analysis = analysis.into_value();
        let context = context.into_value();

        let confidence = (detection.confidence + (analysis.confidence - 0.5)).clamp(0.0, 1.0);
        let threshold_used = self.controller.get_current_threshold();

        if detection.is_anomaly {
            self.retriever.add_pattern(
                anomaly_type.as_str(),
                &description,
                PatternMetadata {
                    video_id: video_id.to_string(),
                    frame_number,
                    anomaly_score: detection.anomaly_score,
                    confidence,
                },
            );
        }

        Ok(FrameDetectionRecord {
            frame_number,
            timestamp_seconds,
            video_id: video_id.to_string(),
            user_id: user_id.to_string(),
            anomaly_score: detection.anomaly_score,
            is_anomaly: detection.is_anomaly,
            anomaly_type,
            confidence,
            original_confidence: detection.confidence,
            threshold_used,
            summary: generate_summary(&context, &detection),
            description,
            context: Some(context),
            analysis: Some(analysis),
            enrichment_fallback,
            features: features.truncated(),
            error: None,
        })
    }
}

fn describe(anomaly_type: AnomalyType, detection: &DetectionResult) -> String {
    if anomaly_type == AnomalyType::Normal {
        format!(
            "Normal surveillance scene with low anomaly score ({:.2})",
            detection.anomaly_score
        )
    } else {
        format!(
            "{} detected with score {:.2} and confidence {:.2}",
            anomaly_type.title(),
            detection.anomaly_score,
            detection.confidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FallbackRetriever, KnowledgeBaseRetriever};
    use crate::detect::{ScriptedScorer, PERSISTED_FEATURE_DIM};
    use crate::frame::RGB_CHANNELS;
    use crate::threshold::{ControllerSettings, Feedback};

    fn frame(index: u64) -> Frame {
        Frame::new(
            vec![(index % 251) as u8; 8 * 6 * RGB_CHANNELS],
            8,
            6,
            index,
            "video-1",
            30.0,
        )
    }

    fn controller() -> Arc<ThresholdController> {
        Arc::new(
            ThresholdController::new(ControllerSettings {
                seed: Some(11),
                ..ControllerSettings::default()
            })
            .unwrap(),
        )
    }

    fn pipeline_with(
        script: fn(u64) -> f64,
        retriever: Arc<dyn ContextRetriever>,
        controller: Arc<ThresholdController>,
    ) -> FramePipeline {
        FramePipeline::new(
            Box::new(ScriptedScorer::new(0.5, script)),
            retriever,
            controller,
        )
    }

    #[test]
    fn anomaly_type_bands() {
        let cases = [
            (0.25, AnomalyType::Normal),
            (0.45, AnomalyType::Loitering),
            (0.65, AnomalyType::Running),
            (0.75, AnomalyType::CrowdGathering),
            (0.85, AnomalyType::Intrusion),
            (0.95, AnomalyType::Fighting),
            (0.3, AnomalyType::Loitering),
            (0.9, AnomalyType::Fighting),
        ];
        for (score, expected) in cases {
            assert_eq!(AnomalyType::from_score(score), expected, "score {}", score);
        }
    }

    #[test]
    fn anomalous_frame_is_enriched_and_learned() {
        let retriever = Arc::new(KnowledgeBaseRetriever::default());
        let mut pipeline = pipeline_with(|_| 0.95, retriever.clone(), controller());

        let record = pipeline.process(&frame(60), 60, "video-1", "user-1", 30.0);
        assert!(record.is_anomaly);
        assert!(!record.is_degraded());
        assert_eq!(record.anomaly_type, AnomalyType::Fighting);
        assert_eq!(record.timestamp_seconds, 2.0);
        assert_eq!(record.threshold_used, 0.5);
        assert_eq!(record.features.len(), PERSISTED_FEATURE_DIM);
        assert_eq!(
            record.description,
            "Fighting detected with score 0.95 and confidence 0.67"
        );
        assert!(record.summary.starts_with("Anomaly detected with high severity"));
        assert_eq!(
            retriever.patterns("fighting"),
            vec![record.description.clone()]
        );
    }

    #[test]
    fn normal_frame_adds_no_pattern() {
        let retriever = Arc::new(KnowledgeBaseRetriever::default());
        let mut pipeline = pipeline_with(|_| 0.1, retriever.clone(), controller());

        let record = pipeline.process(&frame(5), 5, "video-1", "user-1", 30.0);
        assert!(!record.is_anomaly);
        assert_eq!(record.anomaly_type, AnomalyType::Normal);
        assert_eq!(
            record.description,
            "Normal surveillance scene with low anomaly score (0.10)"
        );
        assert!(retriever.patterns("normal").is_empty());
    }

    #[test]
    fn bad_frame_becomes_degraded_record() {
        let mut pipeline = pipeline_with(
            |_| 0.95,
            Arc::new(KnowledgeBaseRetriever::default()),
            controller(),
        );
        let broken = Frame::new(vec![1, 2, 3], 8, 6, 10, "video-1", 30.0);

        let record = pipeline.process(&broken, 10, "video-1", "user-1", 30.0);
        assert!(record.is_degraded());
        assert_eq!(record.anomaly_type, AnomalyType::Unknown);
        assert_eq!(record.anomaly_score, 0.0);
        assert_eq!(record.confidence, 0.0);
        assert!(!record.is_anomaly);
        assert!(record.error.unwrap().contains("expected 144 bytes"));
    }

    #[test]
    fn non_finite_scores_are_degraded() {
        let mut pipeline = pipeline_with(
            |_| f64::NAN,
            Arc::new(KnowledgeBaseRetriever::default()),
            controller(),
        );
        let record = pipeline.process(&frame(1), 1, "video-1", "user-1", 30.0);
        assert!(record.is_degraded());
        assert!(record.error.unwrap().contains("scripted"));
    }

    #[test]
    fn threshold_is_read_not_written() {
        let controller = Arc::new(
            ThresholdController::new(ControllerSettings {
                exploration_rate: 0.0,
                seed: Some(1),
                ..ControllerSettings::default()
            })
            .unwrap(),
        );
        let mut pipeline = pipeline_with(
            |_| 0.6,
            Arc::new(KnowledgeBaseRetriever::default()),
            controller.clone(),
        );
        controller.adjust(&Feedback::false_positive(None)).unwrap();
        let expected = controller.get_current_threshold();

        let record = pipeline.process(&frame(2), 2, "video-1", "user-1", 30.0);
        assert_eq!(record.threshold_used, expected);
        assert_eq!(controller.get_current_threshold(), expected);
        assert_eq!(
            controller.get_performance_metrics().unwrap().total_adjustments,
            1
        );
    }

    #[test]
    fn fallback_retriever_still_produces_records() {
        let mut pipeline = pipeline_with(|_| 0.85, Arc::new(FallbackRetriever), controller());
        let record = pipeline.process(&frame(3), 3, "video-1", "user-1", 0.0);
        assert!(record.enrichment_fallback);
        assert!(!record.is_degraded());
        assert_eq!(record.confidence, record.original_confidence);
        assert_eq!(record.timestamp_seconds, 0.1);
    }
}
