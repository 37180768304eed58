use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::context::{DEFAULT_CACHE_CAPACITY, DEFAULT_PATTERN_CAP};
use crate::detect::{ScorerRegistry, ScorerSettings};
use crate::jobs::RunnerSettings;
use crate::threshold::ControllerSettings;

const DEFAULT_DB_PATH: &str = "autovision.db";
const DEFAULT_STRIDE: u64 = 5;
const DEFAULT_YIELD_EVERY: u64 = 100;
const DEFAULT_MAX_DECODE_SECS: u64 = 3600;
const DEFAULT_SCORER: &str = "simulated";
const DEFAULT_SCORER_THRESHOLD: f64 = 0.5;
const DEFAULT_MIN_SCORE: f64 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct SamplingSettings {
    pub stride: u64,
    pub yield_every: u64,
    pub max_decode: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScorerConfig {
    pub backend: String,
    pub threshold: f64,
    pub min_score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrieverConfig {
    pub cache_capacity: usize,
    pub pattern_cap: usize,
}

/// Static service configuration, read once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub db_path: String,
    pub sampling: SamplingSettings,
    pub scorer: ScorerConfig,
    pub controller: ControllerSettings,
    pub retriever: RetrieverConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    db_path: Option<String>,
    sampling: Option<SamplingConfigFile>,
    scorer: Option<ScorerConfigFile>,
    controller: Option<ControllerConfigFile>,
    retriever: Option<RetrieverConfigFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SamplingConfigFile {
    stride: Option<u64>,
    yield_every: Option<u64>,
    max_decode_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScorerConfigFile {
    backend: Option<String>,
    threshold: Option<f64>,
    min_score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerConfigFile {
    initial_threshold: Option<f64>,
    learning_rate: Option<f64>,
    discount_factor: Option<f64>,
    exploration_rate: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrieverConfigFile {
    cache_capacity: Option<usize>,
    pattern_cap: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    /// Defaults, then the file named by `AUTOVISION_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("AUTOVISION_CONFIG") {
            Ok(path) if !path.trim().is_empty() => read_config_file(Path::new(&path))?,
            _ => AppConfigFile::default(),
        };
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, still honoring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn scorer_settings(&self) -> ScorerSettings {
        ScorerSettings {
            threshold: self.scorer.threshold,
            min_score: self.scorer.min_score,
            seed: self.controller.seed,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        self.controller.clone()
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            stride: self.sampling.stride,
            yield_every: self.sampling.yield_every,
            max_decode: self.sampling.max_decode,
        }
    }

    fn from_file(file: AppConfigFile) -> Self {
        let sampling = file.sampling.unwrap_or_default();
        let scorer = file.scorer.unwrap_or_default();
        let controller = file.controller.unwrap_or_default();
        let retriever = file.retriever.unwrap_or_default();
        let defaults = ControllerSettings::default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            sampling: SamplingSettings {
                stride: sampling.stride.unwrap_or(DEFAULT_STRIDE),
                yield_every: sampling.yield_every.unwrap_or(DEFAULT_YIELD_EVERY),
                max_decode: Duration::from_secs(
                    sampling.max_decode_secs.unwrap_or(DEFAULT_MAX_DECODE_SECS),
                ),
            },
            scorer: ScorerConfig {
                backend: scorer.backend.unwrap_or_else(|| DEFAULT_SCORER.to_string()),
                threshold: scorer.threshold.unwrap_or(DEFAULT_SCORER_THRESHOLD),
                min_score: scorer.min_score.unwrap_or(DEFAULT_MIN_SCORE),
            },
            controller: ControllerSettings {
                initial_threshold: controller
                    .initial_threshold
                    .unwrap_or(defaults.initial_threshold),
                learning_rate: controller.learning_rate.unwrap_or(defaults.learning_rate),
                discount_factor: controller
                    .discount_factor
                    .unwrap_or(defaults.discount_factor),
                exploration_rate: controller
                    .exploration_rate
                    .unwrap_or(defaults.exploration_rate),
                seed: controller.seed,
            },
            retriever: RetrieverConfig {
                cache_capacity: retriever.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
                pattern_cap: retriever.pattern_cap.unwrap_or(DEFAULT_PATTERN_CAP),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("AUTOVISION_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Some(stride) = env_parse::<u64>("AUTOVISION_FRAME_SAMPLING_RATE")? {
            self.sampling.stride = stride;
        }
        if let Some(secs) = env_parse::<u64>("AUTOVISION_MAX_DECODE_SECS")? {
            self.sampling.max_decode = Duration::from_secs(secs);
        }
        if let Ok(backend) = std::env::var("AUTOVISION_SCORER") {
            if !backend.trim().is_empty() {
                self.scorer.backend = backend.trim().to_lowercase();
            }
        }
        if let Some(threshold) = env_parse::<f64>("AUTOVISION_ANOMALY_THRESHOLD")? {
            self.scorer.threshold = threshold;
        }
        if let Some(min_score) = env_parse::<f64>("AUTOVISION_MIN_ANOMALY_SCORE")? {
            self.scorer.min_score = min_score;
        }
        if let Some(initial) = env_parse::<f64>("AUTOVISION_INITIAL_THRESHOLD")? {
            self.controller.initial_threshold = initial;
        }
        if let Some(rate) = env_parse::<f64>("AUTOVISION_RL_LEARNING_RATE")? {
            self.controller.learning_rate = rate;
        }
        if let Some(seed) = env_parse::<u64>("AUTOVISION_RL_SEED")? {
            self.controller.seed = Some(seed);
        }
        if let Some(capacity) = env_parse::<usize>("AUTOVISION_CACHE_CAPACITY")? {
            self.retriever.cache_capacity = capacity;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.sampling.stride == 0 {
            return Err(anyhow!("sampling.stride must be at least 1"));
        }
        if self.sampling.yield_every == 0 {
            return Err(anyhow!("sampling.yield_every must be at least 1"));
        }
        if self.sampling.max_decode.as_secs() == 0 {
            return Err(anyhow!("sampling.max_decode_secs must be at least 1"));
        }
        if !ScorerRegistry::with_builtin().contains(&self.scorer.backend) {
            return Err(anyhow!(
                "scorer.backend '{}' is not a registered scorer",
                self.scorer.backend
            ));
        }
        unit_interval("scorer.threshold", self.scorer.threshold)?;
        unit_interval("scorer.min_score", self.scorer.min_score)?;
        self.controller.validate()?;
        if self.retriever.cache_capacity == 0 {
            return Err(anyhow!("retriever.cache_capacity must be at least 1"));
        }
        if self.retriever.pattern_cap == 0 {
            return Err(anyhow!("retriever.pattern_cap must be at least 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value)),
        _ => Ok(None),
    }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.db_path, "autovision.db");
        assert_eq!(cfg.sampling.stride, 5);
        assert_eq!(cfg.scorer.backend, "simulated");
        assert_eq!(cfg.controller.initial_threshold, 0.5);
        assert_eq!(cfg.retriever.cache_capacity, 100);
        assert_eq!(cfg.runner_settings(), RunnerSettings::default());
    }

    #[test]
    fn partial_json_file_keeps_other_defaults() {
        let file: AppConfigFile =
            serde_json::from_str(r#"{"sampling":{"stride":10},"scorer":{"backend":"luma"}}"#)
                .unwrap();
        let cfg = AppConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.sampling.stride, 10);
        assert_eq!(cfg.sampling.yield_every, 100);
        assert_eq!(cfg.scorer.backend, "luma");
        assert_eq!(cfg.scorer.min_score, 0.1);
    }

    #[test]
    fn toml_file_parses() {
        let file: AppConfigFile = toml::from_str(
            "db_path = \"/tmp/av.db\"\n[controller]\ninitial_threshold = 0.3\nseed = 9\n",
        )
        .unwrap();
        let cfg = AppConfig::from_file(file);
        assert_eq!(cfg.db_path, "/tmp/av.db");
        assert_eq!(cfg.controller.initial_threshold, 0.3);
        assert_eq!(cfg.scorer_settings().seed, Some(9));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<AppConfigFile>(r#"{"colour":"red"}"#).is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.sampling.stride = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scorer.backend = "yolo".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.controller.initial_threshold = 0.95;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scorer.min_score = -0.1;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.retriever.cache_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
