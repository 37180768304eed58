pub mod luma;
pub mod scripted;
pub mod simulated;

pub use luma::LumaScorer;
pub use scripted::ScriptedScorer;
pub use simulated::SimulatedScorer;
