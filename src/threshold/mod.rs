//! Feedback-driven decision threshold.
//!
//! The controller owns the only process-wide mutable state of the core. Every
//! `adjust` runs under one mutex, and the committed threshold is mirrored in an
//! atomic so frame pipelines read it without taking the lock.

mod metrics;
mod policy;

pub use metrics::{ConfusionCounts, PerformanceMetrics, TrainingStatus, TrainingSummary};
pub use policy::{
    select_action, Action, Feedback, Outcome, PolicyState, QTable, MAX_FEEDBACK_SCORE,
    MAX_THRESHOLD, MIN_FEEDBACK_SCORE, MIN_THRESHOLD, THRESHOLD_STEP,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::storage::TrainingJournal;

pub const ALGORITHM: &str = "Q-Learning with epsilon-greedy";

const JOURNAL_ATTEMPTS: u32 = 3;
const JOURNAL_BACKOFF: Duration = Duration::from_millis(20);
const LOG_EVERY_ADJUSTMENTS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    pub initial_threshold: f64,
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub exploration_rate: f64,
    /// Fixed RNG seed. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial_threshold: 0.5,
            learning_rate: 0.01,
            discount_factor: 0.95,
            exploration_rate: 0.1,
            seed: None,
        }
    }
}

impl ControllerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&self.initial_threshold) {
            return Err(anyhow!(
                "initial_threshold must be within [{}, {}]",
                MIN_THRESHOLD,
                MAX_THRESHOLD
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(anyhow!("learning_rate must be within (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return Err(anyhow!("discount_factor must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(anyhow!("exploration_rate must be within [0, 1]"));
        }
        Ok(())
    }
}

/// One learning step as written to the training journal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state_vector: Vec<f64>,
    pub action: u8,
    pub reward: f64,
    pub next_state_vector: Vec<f64>,
    pub done: bool,
}

struct ControllerState {
    threshold: f64,
    counts: ConfusionCounts,
    table: QTable,
    adjustment_count: u64,
    training_episodes: u64,
    total_reward: f64,
    data_saved: u64,
    last_updated: u64,
    rng: StdRng,
}

pub struct ThresholdController {
    settings: ControllerSettings,
    threshold_bits: AtomicU64,
    state: Mutex<ControllerState>,
    journal: Option<Arc<dyn TrainingJournal>>,
}

impl ThresholdController {
    pub fn new(settings: ControllerSettings) -> Result<Self> {
        settings.validate()?;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let threshold = settings.initial_threshold;
        log::info!(
            "threshold controller initialized (threshold {:.3}, lr {}, epsilon {})",
            threshold,
            settings.learning_rate,
            settings.exploration_rate
        );
        Ok(Self {
            threshold_bits: AtomicU64::new(threshold.to_bits()),
            state: Mutex::new(ControllerState {
                threshold,
                counts: ConfusionCounts::default(),
                table: QTable::default(),
                adjustment_count: 0,
                training_episodes: 0,
                total_reward: 0.0,
                data_saved: 0,
                last_updated: unix_now(),
                rng,
            }),
            settings,
            journal: None,
        })
    }

    /// Persist every transition before it is committed.
    pub fn with_journal(mut self, journal: Arc<dyn TrainingJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Last committed threshold. Lock-free.
    pub fn get_current_threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits.load(Ordering::SeqCst))
    }

    /// Apply one feedback event and return the new threshold.
    ///
    /// The step is computed on a copy of the state. If the journal rejects the
    /// transition after all retries nothing is committed and the error is returned.
    pub fn adjust(&self, feedback: &Feedback) -> Result<f64, ControllerError> {
        feedback.validate()?;
        let mut guard = self.lock_state()?;
        let state = &mut *guard;

        let current = PolicyState::discretize(state.threshold, &state.counts);
        let reward = feedback.reward();
        let action = select_action(
            &state.table,
            current,
            self.settings.exploration_rate,
            &mut state.rng,
        );
        let threshold = action.apply(state.threshold);
        let mut counts = state.counts;
        counts.record(feedback.outcome());
        let next = PolicyState::discretize(threshold, &counts);

        let journaled = match &self.journal {
            Some(journal) => {
                let transition = Transition {
                    state_vector: current.to_vector(state.threshold),
                    action: action.index(),
                    reward,
                    next_state_vector: next.to_vector(threshold),
                    done: false,
                };
                write_with_retry(journal.as_ref(), &transition)?;
                true
            }
            None => false,
        };

        state.table.update(
            current,
            action,
            reward,
            next,
            self.settings.learning_rate,
            self.settings.discount_factor,
        );
        state.threshold = threshold;
        state.counts = counts;
        state.adjustment_count += 1;
        state.training_episodes += 1;
        state.total_reward += reward;
        state.last_updated = unix_now();
        if journaled {
            state.data_saved += 1;
        }
        self.threshold_bits.store(threshold.to_bits(), Ordering::SeqCst);

        if state.adjustment_count % LOG_EVERY_ADJUSTMENTS == 0 {
            log::info!(
                "threshold adjusted to {:.3} (FP: {}, FN: {}, TP: {}, reward: {:.2})",
                threshold,
                counts.false_positives,
                counts.false_negatives,
                counts.true_positives,
                state.total_reward
            );
        }
        Ok(threshold)
    }

    /// Restore the initial threshold and zero the counters. The learned table and
    /// reward totals are kept.
    pub fn reset(&self) -> Result<(), ControllerError> {
        let mut state = self.lock_state()?;
        state.threshold = self.settings.initial_threshold;
        state.counts = ConfusionCounts::default();
        state.adjustment_count = 0;
        state.last_updated = unix_now();
        self.threshold_bits
            .store(self.settings.initial_threshold.to_bits(), Ordering::SeqCst);
        log::info!("threshold controller reset to {:.3}", state.threshold);
        Ok(())
    }

    pub fn get_performance_metrics(&self) -> Result<PerformanceMetrics, ControllerError> {
        let state = self.lock_state()?;
        Ok(metrics_of(&state))
    }

    pub fn get_training_summary(&self) -> Result<TrainingSummary, ControllerError> {
        let state = self.lock_state()?;
        Ok(TrainingSummary {
            algorithm: ALGORITHM.to_string(),
            training_episodes: state.training_episodes,
            exploration_rate: self.settings.exploration_rate,
            learning_rate: self.settings.learning_rate,
            discount_factor: self.settings.discount_factor,
            training_status: if state.adjustment_count > 0 {
                TrainingStatus::Active
            } else {
                TrainingStatus::Idle
            },
            data_persisted: state.data_saved,
            last_updated: state.last_updated,
            metrics: metrics_of(&state),
        })
    }

    /// Snapshot of the confusion counters.
    pub fn counts(&self) -> Result<ConfusionCounts, ControllerError> {
        Ok(self.lock_state()?.counts)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ControllerState>, ControllerError> {
        self.state.lock().map_err(|_| ControllerError::LockPoisoned)
    }
}

fn metrics_of(state: &ControllerState) -> PerformanceMetrics {
    let counts = &state.counts;
    PerformanceMetrics {
        current_threshold: state.threshold,
        total_adjustments: state.adjustment_count,
        false_positives: counts.false_positives,
        false_negatives: counts.false_negatives,
        true_positives: counts.true_positives,
        true_negatives: counts.true_negatives,
        accuracy: counts.accuracy(),
        precision: counts.precision(),
        recall: counts.recall(),
        f1_score: counts.f1(),
        total_reward: state.total_reward,
        avg_reward: state.total_reward / state.training_episodes.max(1) as f64,
        q_table_size: state.table.len(),
        data_saved: state.data_saved,
    }
}

fn write_with_retry(
    journal: &dyn TrainingJournal,
    transition: &Transition,
) -> Result<(), ControllerError> {
    let mut attempt = 1;
    loop {
        match journal.record_transition(transition) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < JOURNAL_ATTEMPTS => {
                log::warn!(
                    "training journal write failed (attempt {}/{}): {}",
                    attempt,
                    JOURNAL_ATTEMPTS,
                    e
                );
                std::thread::sleep(JOURNAL_BACKOFF * attempt);
                attempt += 1;
            }
            Err(e) => {
                log::error!("training journal write abandoned: {}", e);
                return Err(ControllerError::Journal {
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
