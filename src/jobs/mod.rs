//! Video job execution.
//!
//! - `VideoJobRunner`: decode, sample, score and persist one video
//! - `JobQueue`: FIFO submission drained by one background worker thread
//! - `JobReport` / `ProcessorStats`: per-job and processor-wide statistics
//!
//! Frame order inside a job is strictly sequential. At most one job decodes at a
//! time per queue.

mod queue;
mod runner;
mod stats;

pub use queue::{JobHandle, JobQueue, JobState};
pub use runner::{RunnerSettings, VideoJob, VideoJobRunner};
pub use stats::{JobReport, ProcessorStats, ProcessorStatsSnapshot, HIGH_RISK_SCORE};
