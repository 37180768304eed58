use std::collections::BTreeMap;

pub const NORMAL_PATTERNS: &str = "normal_patterns";
pub const ANOMALY_PATTERNS: &str = "anomaly_patterns";
pub const CONTEXT_RULES: &str = "context_rules";

/// Default per-category pattern cap.
pub const DEFAULT_PATTERN_CAP: usize = 20;

const SEED_NORMAL: &[&str] = &[
    "Regular pedestrian movement",
    "Normal vehicle traffic",
    "Standard lighting conditions",
    "Typical weather patterns",
];

const SEED_ANOMALY: &[&str] = &[
    "Unusual crowd gathering",
    "Vehicle stopped in restricted area",
    "Person in restricted zone",
    "Suspicious object left behind",
    "Irregular lighting changes",
    "Weather-related visibility issues",
];

const SEED_RULES: &[&str] = &[
    "Higher threshold during busy hours",
    "Lower threshold in restricted areas",
    "Adjust for weather conditions",
    "Consider time of day patterns",
];

/// Pattern descriptions grouped by category label.
///
/// Each category is append-only and keeps at most `cap` most-recent entries.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    categories: BTreeMap<String, Vec<String>>,
    cap: usize,
}

impl KnowledgeBase {
    pub fn empty(cap: usize) -> Self {
        Self {
            categories: BTreeMap::new(),
            cap: cap.max(1),
        }
    }

    /// Knowledge base seeded with the built-in normal, anomaly and rule patterns.
    pub fn seeded(cap: usize) -> Self {
        let mut kb = Self::empty(cap);
        for (category, seeds) in [
            (NORMAL_PATTERNS, SEED_NORMAL),
            (ANOMALY_PATTERNS, SEED_ANOMALY),
            (CONTEXT_RULES, SEED_RULES),
        ] {
            for seed in seeds {
                kb.add(category, seed);
            }
        }
        kb
    }

    pub fn patterns(&self, category: &str) -> &[String] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, category: &str, description: &str) -> bool {
        self.patterns(category).iter().any(|p| p == description)
    }

    /// Append a description. Returns false when it was already present.
    pub fn add(&mut self, category: &str, description: &str) -> bool {
        let entries = self.categories.entry(category.to_string()).or_default();
        if entries.iter().any(|p| p == description) {
            return false;
        }
        entries.push(description.to_string());
        if entries.len() > self.cap {
            let excess = entries.len() - self.cap;
            entries.drain(..excess);
        }
        true
    }

    /// Total number of stored descriptions.
    pub fn size(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_base_has_three_categories() {
        let kb = KnowledgeBase::seeded(DEFAULT_PATTERN_CAP);
        assert_eq!(kb.category_count(), 3);
        assert_eq!(kb.patterns(ANOMALY_PATTERNS).len(), 6);
        assert_eq!(kb.size(), 14);
    }

    #[test]
    fn add_is_idempotent() {
        let mut kb = KnowledgeBase::empty(5);
        assert!(kb.add("running", "Running detected"));
        assert!(!kb.add("running", "Running detected"));
        assert_eq!(kb.patterns("running").len(), 1);
    }

    #[test]
    fn cap_keeps_most_recent_entries() {
        let mut kb = KnowledgeBase::empty(DEFAULT_PATTERN_CAP);
        for i in 0..25 {
            kb.add("intrusion", &format!("event {}", i));
        }
        let entries = kb.patterns("intrusion");
        assert_eq!(entries.len(), DEFAULT_PATTERN_CAP);
        assert_eq!(entries.first().map(String::as_str), Some("event 5"));
        assert_eq!(entries.last().map(String::as_str), Some("event 24"));
    }

    #[test]
    fn unknown_category_is_empty() {
        let kb = KnowledgeBase::seeded(DEFAULT_PATTERN_CAP);
        assert!(kb.patterns("fighting").is_empty());
    }
}
