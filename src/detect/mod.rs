mod backend;
mod backends;
mod features;
mod registry;
mod result;

pub use backend::AnomalyScorer;
pub use backends::{LumaScorer, ScriptedScorer, SimulatedScorer};
pub use features::{extract_features, FEATURE_DIM, PERSISTED_FEATURE_DIM};
pub use registry::{ScorerRegistry, ScorerSettings};
pub use result::{DetectionResult, FeatureVector};
