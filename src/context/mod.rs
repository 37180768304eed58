//! Context retrieval for detections.
//!
//! A retriever enriches a scored frame with known patterns and recommendations:
//! - `retrieve`: banded context for a feature vector, cached in a FIFO cache
//! - `analyze`: keyword analysis of a textual description against the knowledge base
//! - `add_pattern`: advisory ingestion of newly observed patterns
//!
//! Retrieval is best-effort. It never aborts the frame pipeline; failures surface as
//! `Enrichment::Fallback` values instead.

mod cache;
mod knowledge;
mod retriever;
mod types;

pub use cache::FifoCache;
pub use knowledge::{
    KnowledgeBase, ANOMALY_PATTERNS, CONTEXT_RULES, DEFAULT_PATTERN_CAP, NORMAL_PATTERNS,
};
pub use retriever::{FallbackRetriever, KnowledgeBaseRetriever, DEFAULT_CACHE_CAPACITY};
pub use types::{
    generate_summary, AnalysisKind, AnalysisResult, ContextResult, LearnedPattern,
    PatternCategory, PatternMetadata, RetrieverStats,
};

use crate::detect::FeatureVector;
use crate::error::Enrichment;

/// Contract every retriever satisfies. There is no optional capability: a
/// retriever without a knowledge base implements the methods with fallbacks.
pub trait ContextRetriever: Send + Sync {
    /// Retriever identifier.
    fn name(&self) -> &'static str;

    /// Context for a feature vector and score. Deterministic for identical inputs
    /// and cache state.
    fn retrieve(&self, features: &FeatureVector, anomaly_score: f64) -> Enrichment<ContextResult>;

    /// Keyword analysis of a detection description.
    fn analyze(
        &self,
        description: &str,
        anomaly_score: f64,
        anomaly_type: &str,
    ) -> Enrichment<AnalysisResult>;

    /// Record a newly observed pattern. Advisory: errors are logged, not returned.
    fn add_pattern(&self, category: &str, description: &str, metadata: PatternMetadata);

    fn statistics(&self) -> RetrieverStats;

    fn clear_cache(&self);
}
