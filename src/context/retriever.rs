use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, OnceLock};

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use sha2::{Digest, Sha256};

use super::cache::FifoCache;
use super::knowledge::{KnowledgeBase, ANOMALY_PATTERNS, DEFAULT_PATTERN_CAP, NORMAL_PATTERNS};
use super::types::{
    AnalysisKind, AnalysisResult, ContextResult, LearnedPattern, PatternCategory, PatternMetadata,
    RetrieverStats,
};
use super::ContextRetriever;
use crate::detect::FeatureVector;
use crate::error::Enrichment;

/// Default retrieval cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

const MAX_RECOMMENDATIONS: usize = 3;
const MIN_KEYWORD_LEN: usize = 3;
const ANOMALY_HIT_BONUS: f64 = 0.1;
const NORMAL_HIT_PENALTY: f64 = 0.2;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Features(u64),
    Pattern { category: String, digest: String },
}

#[derive(Clone, Debug)]
enum CacheEntry {
    Context(ContextResult),
    Pattern(LearnedPattern),
}

struct RetrieverState {
    knowledge: KnowledgeBase,
    cache: FifoCache<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Retriever backed by an in-process knowledge base and a FIFO cache.
///
/// Knowledge base and cache live behind one mutex so cache insertion order is a
/// total order even when several pipelines share the retriever.
pub struct KnowledgeBaseRetriever {
    state: Mutex<RetrieverState>,
}

impl KnowledgeBaseRetriever {
    pub fn new(cache_capacity: usize, pattern_cap: usize) -> Self {
        log::info!(
            "context retriever initialized (cache capacity {}, pattern cap {})",
            cache_capacity,
            pattern_cap
        );
        Self {
            state: Mutex::new(RetrieverState {
                knowledge: KnowledgeBase::seeded(pattern_cap),
                cache: FifoCache::new(cache_capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Patterns currently stored under a category.
    pub fn patterns(&self, category: &str) -> Vec<String> {
        self.lock()
            .map(|state| state.knowledge.patterns(category).to_vec())
            .unwrap_or_default()
    }

    /// A learned pattern as last recorded, while its cache entry survives.
    pub fn learned_pattern(&self, category: &str, description: &str) -> Option<LearnedPattern> {
        let state = self.lock().ok()?;
        let key = pattern_key(category, &digest(description));
        match state.cache.get(&key) {
            Some(CacheEntry::Pattern(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// How often a pattern was added, while its cache entry survives.
    pub fn pattern_frequency(&self, category: &str, description: &str) -> Option<u32> {
        self.learned_pattern(category, description).map(|entry| entry.frequency)
    }

    fn lock(&self) -> Result<MutexGuard<'_, RetrieverState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("retriever state lock poisoned"))
    }

    fn try_retrieve(&self, features: &FeatureVector, anomaly_score: f64) -> Result<ContextResult> {
        let key = CacheKey::Features(features.cache_key());
        let mut state = self.lock()?;

        let cached = match state.cache.get(&key) {
            Some(CacheEntry::Context(context)) => Some(context.clone()),
            _ => None,
        };
        if let Some(context) = cached {
            state.hits += 1;
            return Ok(context);
        }

        let context = banded_context(anomaly_score, Some(&state.knowledge));
        state.misses += 1;
        state.cache.insert(key, CacheEntry::Context(context.clone()));
        Ok(context)
    }

    fn try_analyze(
        &self,
        description: &str,
        anomaly_score: f64,
        anomaly_type: &str,
    ) -> Result<AnalysisResult> {
        if !anomaly_score.is_finite() {
            bail!("anomaly score {} is not finite", anomaly_score);
        }
        let state = self.lock()?;
        let kb = &state.knowledge;
        let words = keywords(description);

        let anomaly_vocab: BTreeSet<String> = kb
            .patterns(ANOMALY_PATTERNS)
            .iter()
            .flat_map(|p| keywords(p))
            .collect();

        let mut adjustment = 0.0;
        for pattern in kb.patterns(ANOMALY_PATTERNS) {
            if !keywords(pattern).is_disjoint(&words) {
                adjustment += ANOMALY_HIT_BONUS;
            }
        }
        // Only keywords that never appear in anomaly patterns count as evidence of normality.
        if anomaly_score > 0.5 {
            for pattern in kb.patterns(NORMAL_PATTERNS) {
                let distinctive = keywords(pattern)
                    .iter()
                    .any(|w| words.contains(w) && !anomaly_vocab.contains(w));
                if distinctive {
                    adjustment -= NORMAL_HIT_PENALTY;
                }
            }
        }
        let confidence = (0.5 + adjustment).clamp(0.0, 1.0);

        let relevant_patterns = relevant_patterns(&words, anomaly_type, kb);
        let explanation = explanation(anomaly_score, anomaly_type, !relevant_patterns.is_empty());
        let recommendations = analysis_recommendations(anomaly_score, anomaly_type);

        log::debug!(
            "context analysis for {}: confidence={:.3}",
            anomaly_type,
            confidence
        );

        Ok(AnalysisResult {
            confidence,
            explanation,
            recommendations,
            relevant_patterns,
            anomaly_type: anomaly_type.to_string(),
            analysis_kind: AnalysisKind::KnowledgeBase,
        })
    }

    fn try_add_pattern(
        &self,
        category: &str,
        description: &str,
        metadata: PatternMetadata,
    ) -> Result<()> {
        if category.trim().is_empty() {
            bail!("pattern category is empty");
        }
        if description.trim().is_empty() {
            bail!("pattern description is empty");
        }

        let hash = digest(description);
        let mut state = self.lock()?;
        if state.knowledge.add(category, description) {
            log::debug!("pattern added to '{}': {}", category, description);
        }

        let key = pattern_key(category, &hash);
        if let Some(CacheEntry::Pattern(entry)) = state.cache.get_mut(&key) {
            entry.frequency += 1;
            entry.metadata = metadata;
            return Ok(());
        }
        state.cache.insert(
            key,
            CacheEntry::Pattern(LearnedPattern {
                description: description.to_string(),
                metadata,
                embedding: embedding(&hash),
                frequency: 1,
            }),
        );
        Ok(())
    }
}

impl Default for KnowledgeBaseRetriever {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_PATTERN_CAP)
    }
}

impl ContextRetriever for KnowledgeBaseRetriever {
    fn name(&self) -> &'static str {
        "knowledge_base"
    }

    fn retrieve(&self, features: &FeatureVector, anomaly_score: f64) -> Enrichment<ContextResult> {
        match self.try_retrieve(features, anomaly_score) {
            Ok(context) => Enrichment::Computed(context),
            Err(e) => {
                log::warn!("context retrieval fell back: {}", e);
                Enrichment::Fallback {
                    value: banded_context(anomaly_score, None),
                    reason: e.to_string(),
                }
            }
        }
    }

    fn analyze(
        &self,
        description: &str,
        anomaly_score: f64,
        anomaly_type: &str,
    ) -> Enrichment<AnalysisResult> {
        match self.try_analyze(description, anomaly_score, anomaly_type) {
            Ok(analysis) => Enrichment::Computed(analysis),
            Err(e) => {
                log::error!("context analysis failed, using fallback: {}", e);
                Enrichment::Fallback {
                    value: AnalysisResult::fallback(anomaly_type),
                    reason: e.to_string(),
                }
            }
        }
    }

    fn add_pattern(&self, category: &str, description: &str, metadata: PatternMetadata) {
        if let Err(e) = self.try_add_pattern(category, description, metadata) {
            log::warn!("pattern '{}' not recorded: {}", category, e);
        }
    }

    fn statistics(&self) -> RetrieverStats {
        let Ok(state) = self.lock() else {
            return RetrieverStats::default();
        };
        let lookups = state.hits + state.misses;
        RetrieverStats {
            knowledge_base_size: state.knowledge.size(),
            categories: state.knowledge.category_count(),
            cache_size: state.cache.len(),
            cache_capacity: state.cache.capacity(),
            cache_hits: state.hits,
            cache_misses: state.misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    fn clear_cache(&self) {
        match self.lock() {
            Ok(mut state) => {
                state.cache.clear();
                log::info!("context retriever cache cleared");
            }
            Err(e) => log::warn!("cache not cleared: {}", e),
        }
    }
}

/// Retriever with no knowledge base. Every answer is a fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackRetriever;

impl ContextRetriever for FallbackRetriever {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn retrieve(&self, _features: &FeatureVector, anomaly_score: f64) -> Enrichment<ContextResult> {
        Enrichment::Fallback {
            value: banded_context(anomaly_score, None),
            reason: "no knowledge base configured".to_string(),
        }
    }

    fn analyze(
        &self,
        _description: &str,
        _anomaly_score: f64,
        anomaly_type: &str,
    ) -> Enrichment<AnalysisResult> {
        Enrichment::Fallback {
            value: AnalysisResult::fallback(anomaly_type),
            reason: "no knowledge base configured".to_string(),
        }
    }

    fn add_pattern(&self, category: &str, _description: &str, _metadata: PatternMetadata) {
        log::debug!("fallback retriever ignores pattern for '{}'", category);
    }

    fn statistics(&self) -> RetrieverStats {
        RetrieverStats::default()
    }

    fn clear_cache(&self) {}
}

fn banded_context(anomaly_score: f64, kb: Option<&KnowledgeBase>) -> ContextResult {
    let pattern_category = PatternCategory::from_score(anomaly_score);
    let relevant_patterns = match kb {
        Some(kb) => {
            let normal = kb.patterns(NORMAL_PATTERNS);
            let anomaly = kb.patterns(ANOMALY_PATTERNS);
            match pattern_category {
                PatternCategory::HighAnomaly => anomaly.to_vec(),
                PatternCategory::MediumAnomaly => anomaly
                    .iter()
                    .take(2)
                    .chain(normal.iter().take(2))
                    .cloned()
                    .collect(),
                PatternCategory::Normal => normal.to_vec(),
            }
        }
        None => Vec::new(),
    };

    ContextResult {
        pattern_category,
        relevant_patterns,
        confidence: (0.5 + anomaly_score * 0.4).min(0.9),
        recommendations: retrieval_recommendations(anomaly_score),
    }
}

fn retrieval_recommendations(anomaly_score: f64) -> Vec<String> {
    let recs: &[&str] = if anomaly_score > 0.8 {
        &[
            "Immediate attention required",
            "Consider alerting security personnel",
            "Review related camera feeds",
        ]
    } else if anomaly_score > 0.6 {
        &[
            "Monitor situation closely",
            "Check for pattern continuation",
            "Review historical data",
        ]
    } else if anomaly_score > 0.4 {
        &["Continue monitoring", "Log for pattern analysis"]
    } else {
        &["Normal operation"]
    };
    recs.iter().map(|r| r.to_string()).collect()
}

fn analysis_recommendations(anomaly_score: f64, anomaly_type: &str) -> Vec<String> {
    let banded: &[&str] = if anomaly_score > 0.8 {
        &[
            "Alert security personnel immediately",
            "Review live video feed",
            "Consider activating emergency protocols",
        ]
    } else if anomaly_score > 0.5 {
        &[
            "Monitor situation closely",
            "Review historical data for patterns",
            "Consider manual verification",
        ]
    } else {
        &["Log for statistical analysis", "Continue normal monitoring"]
    };

    // The type-specific entry always survives the cap.
    let mut recs: Vec<String> = match type_recommendation(anomaly_type) {
        Some(extra) => banded
            .iter()
            .take(MAX_RECOMMENDATIONS - 1)
            .map(|r| r.to_string())
            .chain(std::iter::once(extra.to_string()))
            .collect(),
        None => banded.iter().map(|r| r.to_string()).collect(),
    };
    recs.truncate(MAX_RECOMMENDATIONS);
    recs
}

fn type_recommendation(anomaly_type: &str) -> Option<&'static str> {
    match anomaly_type {
        "motion_anomaly" | "intrusion" => Some("Check for unauthorized access"),
        "object_anomaly" => Some("Verify object identification"),
        "crowd_gathering" => Some("Assess crowd density near exits"),
        "fighting" => Some("Dispatch security to the scene"),
        _ => None,
    }
}

fn explanation(anomaly_score: f64, anomaly_type: &str, has_context: bool) -> String {
    let severity = if anomaly_score > 0.7 {
        "high"
    } else if anomaly_score > 0.4 {
        "moderate"
    } else {
        "low"
    };
    let mut text = format!(
        "Detected {} with {} severity (score: {:.3}). ",
        anomaly_type, severity, anomaly_score
    );
    if has_context {
        text.push_str(&format!(
            "This pattern is similar to known {} events. ",
            anomaly_type
        ));
    }
    text.push_str(if anomaly_score > 0.6 {
        "Requires immediate attention."
    } else if anomaly_score > 0.3 {
        "Monitor for further development."
    } else {
        "Likely normal activity."
    });
    text
}

fn relevant_patterns(
    words: &BTreeSet<String>,
    anomaly_type: &str,
    kb: &KnowledgeBase,
) -> Vec<String> {
    let has = |w: &str| words.contains(w);
    let mut patterns = Vec::new();
    if has("crowd") || has("gathering") {
        patterns.push("Unusual crowd gathering".to_string());
    }
    if has("vehicle") && has("restricted") {
        patterns.push("Vehicle stopped in restricted area".to_string());
    }
    if has("person") && has("restricted") {
        patterns.push("Person in restricted zone".to_string());
    }
    if has("suspicious") || has("object") {
        patterns.push("Suspicious object left behind".to_string());
    }
    patterns.extend(kb.patterns(anomaly_type).iter().rev().take(2).cloned());
    patterns
}

fn keywords(text: &str) -> BTreeSet<String> {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let re = WORD_RE.get_or_init(|| Regex::new(r"[a-z0-9]+").unwrap());
    let lower = text.to_lowercase();
    re.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() >= MIN_KEYWORD_LEN)
        .map(str::to_string)
        .collect()
}

fn digest(description: &str) -> [u8; 32] {
    Sha256::digest(description.as_bytes()).into()
}

fn pattern_key(category: &str, hash: &[u8; 32]) -> CacheKey {
    CacheKey::Pattern {
        category: category.to_string(),
        digest: hex::encode(hash),
    }
}

fn embedding(hash: &[u8; 32]) -> [f32; 5] {
    let mut out = [0.0f32; 5];
    for (i, slot) in out.iter_mut().enumerate() {
        let v = u16::from_le_bytes([hash[i * 2], hash[i * 2 + 1]]);
        *slot = v as f32 / u16::MAX as f32;
    }
    out
}
