use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::AnomalyScorer;
use super::backends::{LumaScorer, SimulatedScorer};

/// Settings shared by every scorer factory.
#[derive(Clone, Debug, PartialEq)]
pub struct ScorerSettings {
    /// Internal decision threshold. Independent of the adaptive controller.
    pub threshold: f64,
    /// Floor applied by scorers that simulate scores.
    pub min_score: f64,
    /// Seed for scorers with randomness.
    pub seed: Option<u64>,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_score: 0.1,
            seed: None,
        }
    }
}

type ScorerFactory = Box<dyn Fn(&ScorerSettings) -> Box<dyn AnomalyScorer> + Send + Sync>;

/// Registry of scorer factories keyed by backend name.
///
/// The first registered backend becomes the default.
pub struct ScorerRegistry {
    factories: BTreeMap<String, ScorerFactory>,
    default_name: Option<String>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in `simulated` (default) and `luma` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("simulated", |settings| {
            let scorer = SimulatedScorer::new(settings.threshold, settings.min_score);
            let scorer = match settings.seed {
                Some(seed) => scorer.with_seed(seed),
                None => scorer,
            };
            Box::new(scorer)
        });
        registry.register("luma", |settings| Box::new(LumaScorer::new(settings.threshold)));
        registry
    }

    /// Register a factory. Re-registering a name replaces the previous factory.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ScorerSettings) -> Box<dyn AnomalyScorer> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("scorer '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List registered backends in name order.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build a scorer by name.
    pub fn build(&self, name: &str, settings: &ScorerSettings) -> Result<Box<dyn AnomalyScorer>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("scorer '{}' not registered", name))?;
        let mut scorer = factory(settings);
        scorer.warm_up()?;
        log::info!(
            "anomaly scorer '{}' initialized with internal threshold {:.2}",
            scorer.name(),
            settings.threshold
        );
        Ok(scorer)
    }

    /// Build the default scorer.
    pub fn build_default(&self, settings: &ScorerSettings) -> Result<Box<dyn AnomalyScorer>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no scorer registered"))?;
        self.build(name, settings)
    }
}

impl Default for ScorerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedScorer;

    #[test]
    fn builtin_registry_lists_backends() {
        let registry = ScorerRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["luma".to_string(), "simulated".to_string()]);
        let scorer = registry.build_default(&ScorerSettings::default()).unwrap();
        assert_eq!(scorer.name(), "simulated");
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = ScorerRegistry::with_builtin();
        assert!(registry.build("yolo", &ScorerSettings::default()).is_err());
    }

    #[test]
    fn default_can_be_switched() {
        let mut registry = ScorerRegistry::with_builtin();
        registry.register("scripted", |settings| {
            Box::new(ScriptedScorer::new(settings.threshold, |_| 0.2))
        });
        registry.set_default("scripted").unwrap();
        let scorer = registry.build_default(&ScorerSettings::default()).unwrap();
        assert_eq!(scorer.name(), "scripted");
        assert!(registry.set_default("missing").is_err());
    }
}
