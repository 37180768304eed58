use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;

/// Score band of a retrieved context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Normal,
    MediumAnomaly,
    HighAnomaly,
}

impl PatternCategory {
    /// `> 0.7` high, `> 0.4` medium, otherwise normal.
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            PatternCategory::HighAnomaly
        } else if score > 0.4 {
            PatternCategory::MediumAnomaly
        } else {
            PatternCategory::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::Normal => "normal",
            PatternCategory::MediumAnomaly => "medium_anomaly",
            PatternCategory::HighAnomaly => "high_anomaly",
        }
    }
}

/// Context retrieved for a feature vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextResult {
    pub pattern_category: PatternCategory,
    pub relevant_patterns: Vec<String>,
    pub confidence: f64,
    /// At most three entries.
    pub recommendations: Vec<String>,
}

/// How an analysis was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    KnowledgeBase,
    Fallback,
}

/// Keyword analysis of a textual detection description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// `clamp(0.5 + adjustment, 0, 1)`.
    pub confidence: f64,
    pub explanation: String,
    /// At most three entries.
    pub recommendations: Vec<String>,
    /// Known patterns the description resembles.
    pub relevant_patterns: Vec<String>,
    pub anomaly_type: String,
    pub analysis_kind: AnalysisKind,
}

impl AnalysisResult {
    /// Fixed result used whenever analysis cannot run.
    pub fn fallback(anomaly_type: &str) -> Self {
        Self {
            confidence: 0.5,
            explanation: "Basic anomaly detection without context analysis".to_string(),
            recommendations: vec!["Review detection manually".to_string()],
            relevant_patterns: Vec::new(),
            anomaly_type: anomaly_type.to_string(),
            analysis_kind: AnalysisKind::Fallback,
        }
    }
}

/// Where a learned pattern was observed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    pub video_id: String,
    pub frame_number: u64,
    pub anomaly_score: f64,
    pub confidence: f64,
}

/// A pattern recorded through `add_pattern`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub description: String,
    /// Metadata of the latest observation.
    pub metadata: PatternMetadata,
    /// Hash-derived signature, each component in `[0, 1]`.
    pub embedding: [f32; 5],
    pub frequency: u32,
}

/// Retriever counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieverStats {
    pub knowledge_base_size: usize,
    pub categories: usize,
    pub cache_size: usize,
    pub cache_capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}

/// Human-readable one-paragraph summary of a detection and its retrieved context.
pub fn generate_summary(context: &ContextResult, detection: &DetectionResult) -> String {
    let score = detection.anomaly_score;
    let mut summary = if detection.is_anomaly {
        let severity = if score > 0.7 {
            "high"
        } else if score > 0.5 {
            "medium"
        } else {
            "low"
        };
        format!(
            "Anomaly detected with {} severity (score: {:.3}, confidence: {:.3}). ",
            severity, score, detection.confidence
        )
    } else {
        format!("Normal activity detected (score: {:.3}). ", score)
    };

    if !context.relevant_patterns.is_empty() {
        let similar: Vec<&str> = context
            .relevant_patterns
            .iter()
            .take(2)
            .map(String::as_str)
            .collect();
        summary.push_str(&format!("Similar to: {}. ", similar.join(", ")));
    }

    if let Some(first) = context.recommendations.first() {
        summary.push_str(&format!("Recommendation: {}", first));
    }

    summary.trim_end().to_string()
}
