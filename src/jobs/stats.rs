use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::FrameDetectionRecord;

/// Scores above this count as high risk and raise an alert.
pub const HIGH_RISK_SCORE: f64 = 0.8;

const HISTOGRAM_BANDS: usize = 5;

/// Outcome of one completed video job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub video_id: String,
    pub frames_decoded: u64,
    pub frames_scored: u64,
    pub degraded_frames: u64,
    pub anomalies: u64,
    pub high_risk_events: u64,
    pub events_persisted: u64,
    pub events_failed: u64,
    /// Anomalous records per anomaly type.
    pub anomaly_types: BTreeMap<String, u64>,
    pub max_score: f64,
    pub avg_score: f64,
    /// Counts of scored frames in `[0, 0.2)`, `[0.2, 0.4)`, ... `[0.8, 1.0]`.
    pub score_histogram: [u64; HISTOGRAM_BANDS],
    pub processing_secs: f64,
    pub records: Vec<FrameDetectionRecord>,
}

impl JobReport {
    pub fn summarize(
        video_id: &str,
        frames_decoded: u64,
        records: Vec<FrameDetectionRecord>,
        events_persisted: u64,
        events_failed: u64,
        elapsed: Duration,
    ) -> Self {
        let mut anomaly_types = BTreeMap::new();
        let mut score_histogram = [0u64; HISTOGRAM_BANDS];
        let mut degraded_frames = 0;
        let mut anomalies = 0;
        let mut high_risk_events = 0;
        let mut max_score: f64 = 0.0;
        let mut score_sum = 0.0;
        let mut scored = 0u64;

        for record in &records {
            if record.is_degraded() {
                degraded_frames += 1;
                continue;
            }
            scored += 1;
            score_sum += record.anomaly_score;
            max_score = max_score.max(record.anomaly_score);
            let band = ((record.anomaly_score * HISTOGRAM_BANDS as f64) as usize)
                .min(HISTOGRAM_BANDS - 1);
            score_histogram[band] += 1;

            if record.is_anomaly {
                anomalies += 1;
                *anomaly_types
                    .entry(record.anomaly_type.as_str().to_string())
                    .or_insert(0) += 1;
                if record.anomaly_score > HIGH_RISK_SCORE {
                    high_risk_events += 1;
                }
            }
        }

        Self {
            video_id: video_id.to_string(),
            frames_decoded,
            frames_scored: records.len() as u64,
            degraded_frames,
            anomalies,
            high_risk_events,
            events_persisted,
            events_failed,
            anomaly_types,
            max_score,
            avg_score: if scored == 0 {
                0.0
            } else {
                score_sum / scored as f64
            },
            score_histogram,
            processing_secs: elapsed.as_secs_f64(),
            records,
        }
    }
}

/// Counters across every job a processor ran.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    videos_processed: AtomicU64,
    videos_failed: AtomicU64,
    frames_processed: AtomicU64,
    anomalies_detected: AtomicU64,
    processing_time_ms: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorStatsSnapshot {
    pub videos_processed: u64,
    pub videos_failed: u64,
    pub frames_processed: u64,
    pub anomalies_detected: u64,
    pub processing_time_total: f64,
}

impl ProcessorStats {
    pub fn record_completed(&self, report: &JobReport) {
        self.videos_processed.fetch_add(1, Ordering::SeqCst);
        self.frames_processed
            .fetch_add(report.frames_scored, Ordering::SeqCst);
        self.anomalies_detected
            .fetch_add(report.anomalies, Ordering::SeqCst);
        self.processing_time_ms.fetch_add(
            (report.processing_secs * 1000.0) as u64,
            Ordering::SeqCst,
        );
    }

    pub fn record_failed(&self) {
        self.videos_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        ProcessorStatsSnapshot {
            videos_processed: self.videos_processed.load(Ordering::SeqCst),
            videos_failed: self.videos_failed.load(Ordering::SeqCst),
            frames_processed: self.frames_processed.load(Ordering::SeqCst),
            anomalies_detected: self.anomalies_detected.load(Ordering::SeqCst),
            processing_time_total: self.processing_time_ms.load(Ordering::SeqCst) as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::AnomalyType;

    fn record(frame_number: u64, score: f64, is_anomaly: bool) -> FrameDetectionRecord {
        FrameDetectionRecord {
            frame_number,
            timestamp_seconds: frame_number as f64 / 30.0,
            video_id: "v".to_string(),
            user_id: "u".to_string(),
            anomaly_score: score,
            is_anomaly,
            anomaly_type: AnomalyType::from_score(score),
            confidence: 0.7,
            original_confidence: 0.7,
            threshold_used: 0.5,
            description: String::new(),
            summary: String::new(),
            context: None,
            analysis: None,
            enrichment_fallback: false,
            features: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn report_aggregates_scores_and_types() {
        let mut degraded = record(15, 0.0, false);
        degraded.anomaly_type = AnomalyType::Unknown;
        degraded.error = Some("frame 15 has an empty pixel buffer".to_string());

        let records = vec![
            record(0, 0.1, false),
            record(5, 0.85, true),
            record(10, 0.95, true),
            degraded,
            record(20, 0.6, true),
        ];
        let report = JobReport::summarize("v", 25, records, 3, 0, Duration::from_millis(1500));

        assert_eq!(report.frames_scored, 5);
        assert_eq!(report.degraded_frames, 1);
        assert_eq!(report.anomalies, 3);
        assert_eq!(report.high_risk_events, 2);
        assert_eq!(report.max_score, 0.95);
        assert!((report.avg_score - 2.5 / 4.0).abs() < 1e-12);
        assert_eq!(report.score_histogram, [1, 0, 0, 1, 2]);
        assert_eq!(report.anomaly_types.get("intrusion"), Some(&1));
        assert_eq!(report.anomaly_types.get("fighting"), Some(&1));
        assert_eq!(report.anomaly_types.get("running"), Some(&1));
        assert_eq!(report.processing_secs, 1.5);
    }

    #[test]
    fn empty_report_has_zero_average() {
        let report = JobReport::summarize("v", 0, Vec::new(), 0, 0, Duration::ZERO);
        assert_eq!(report.avg_score, 0.0);
        assert_eq!(report.max_score, 0.0);
    }

    #[test]
    fn processor_stats_accumulate() {
        let stats = ProcessorStats::default();
        let report = JobReport::summarize(
            "v",
            10,
            vec![record(0, 0.9, true), record(5, 0.2, false)],
            1,
            0,
            Duration::from_millis(250),
        );
        stats.record_completed(&report);
        stats.record_completed(&report);
        stats.record_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.videos_processed, 2);
        assert_eq!(snapshot.videos_failed, 1);
        assert_eq!(snapshot.frames_processed, 4);
        assert_eq!(snapshot.anomalies_detected, 2);
        assert_eq!(snapshot.processing_time_total, 0.5);
    }
}
