use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::metrics::ConfusionCounts;
use crate::error::ControllerError;

pub const MIN_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 0.9;
pub const THRESHOLD_STEP: f64 = 0.05;

/// Operator ratings run from -1 (worst) to 1 (best).
pub const MIN_FEEDBACK_SCORE: f64 = -1.0;
pub const MAX_FEEDBACK_SCORE: f64 = 1.0;

const THRESHOLD_BINS: [f64; 5] = [0.0, 0.3, 0.5, 0.7, 1.0];
const COUNT_BIN_WIDTH: u64 = 5;
const MAX_COUNT_BIN: u64 = 5;

const FALSE_POSITIVE_REWARD: f64 = -1.0;
const FALSE_NEGATIVE_REWARD: f64 = -1.5;
const TRUE_POSITIVE_REWARD: f64 = 2.0;
const TRUE_NEGATIVE_REWARD: f64 = 0.5;

/// Operator verdict on a past detection.
///
/// Flags are checked in the order false positive, false negative, true positive,
/// true negative. With no flag set the reward is derived from `score`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub false_positive: bool,
    #[serde(default)]
    pub false_negative: bool,
    #[serde(default)]
    pub true_positive: bool,
    #[serde(default)]
    pub true_negative: bool,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Which confusion counter a feedback advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    FalsePositive,
    FalseNegative,
    TruePositive,
    TrueNegative,
    Unlabelled,
}

impl Feedback {
    pub fn false_positive(score: Option<f64>) -> Self {
        Self {
            false_positive: true,
            score,
            ..Self::default()
        }
    }

    pub fn true_positive() -> Self {
        Self {
            true_positive: true,
            ..Self::default()
        }
    }

    pub fn scored(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        match self.score {
            Some(s) if !(MIN_FEEDBACK_SCORE..=MAX_FEEDBACK_SCORE).contains(&s) => {
                Err(ControllerError::InvalidFeedback(s))
            }
            _ => Ok(()),
        }
    }

    pub fn outcome(&self) -> Outcome {
        if self.false_positive {
            Outcome::FalsePositive
        } else if self.false_negative {
            Outcome::FalseNegative
        } else if self.true_positive {
            Outcome::TruePositive
        } else if self.true_negative {
            Outcome::TrueNegative
        } else {
            Outcome::Unlabelled
        }
    }

    pub fn reward(&self) -> f64 {
        match self.outcome() {
            Outcome::FalsePositive => FALSE_POSITIVE_REWARD,
            Outcome::FalseNegative => FALSE_NEGATIVE_REWARD,
            Outcome::TruePositive => TRUE_POSITIVE_REWARD,
            Outcome::TrueNegative => TRUE_NEGATIVE_REWARD,
            Outcome::Unlabelled => (self.score.unwrap_or(0.5) - 0.5) * 0.5,
        }
    }
}

/// Discretized controller state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyState {
    pub threshold_bin: u8,
    pub false_positive_bin: u8,
    pub false_negative_bin: u8,
}

impl PolicyState {
    pub fn discretize(threshold: f64, counts: &ConfusionCounts) -> Self {
        Self {
            threshold_bin: threshold_bin(threshold),
            false_positive_bin: count_bin(counts.false_positives),
            false_negative_bin: count_bin(counts.false_negatives),
        }
    }

    /// Bins followed by the raw threshold, as stored in the training journal.
    pub fn to_vector(&self, threshold: f64) -> Vec<f64> {
        vec![
            self.threshold_bin as f64,
            self.false_positive_bin as f64,
            self.false_negative_bin as f64,
            threshold,
        ]
    }
}

fn threshold_bin(threshold: f64) -> u8 {
    for i in 0..THRESHOLD_BINS.len() - 1 {
        if THRESHOLD_BINS[i] <= threshold && threshold < THRESHOLD_BINS[i + 1] {
            return i as u8;
        }
    }
    (THRESHOLD_BINS.len() - 2) as u8
}

fn count_bin(count: u64) -> u8 {
    (count / COUNT_BIN_WIDTH).min(MAX_COUNT_BIN) as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Decrease,
    Hold,
    Increase,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Decrease, Action::Hold, Action::Increase];

    pub fn index(self) -> u8 {
        match self {
            Action::Decrease => 0,
            Action::Hold => 1,
            Action::Increase => 2,
        }
    }

    /// Move the threshold one step, staying inside `[MIN_THRESHOLD, MAX_THRESHOLD]`.
    pub fn apply(self, threshold: f64) -> f64 {
        match self {
            Action::Decrease => (threshold - THRESHOLD_STEP).max(MIN_THRESHOLD),
            Action::Hold => threshold,
            Action::Increase => (threshold + THRESHOLD_STEP).min(MAX_THRESHOLD),
        }
    }
}

/// Learned action values. Missing entries read as 0.
#[derive(Clone, Debug, Default)]
pub struct QTable {
    values: HashMap<(PolicyState, Action), f64>,
}

impl QTable {
    pub fn value(&self, state: PolicyState, action: Action) -> f64 {
        self.values.get(&(state, action)).copied().unwrap_or(0.0)
    }

    pub fn max_value(&self, state: PolicyState) -> f64 {
        Action::ALL
            .iter()
            .map(|a| self.value(state, *a))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Highest-valued action. Ties go to the earliest action in `Action::ALL`.
    pub fn best_action(&self, state: PolicyState) -> Action {
        let mut best = Action::ALL[0];
        let mut best_value = self.value(state, best);
        for action in &Action::ALL[1..] {
            let v = self.value(state, *action);
            if v > best_value {
                best = *action;
                best_value = v;
            }
        }
        best
    }

    /// One Q-learning step toward `reward + discount * max_next`. Returns the new value.
    pub fn update(
        &mut self,
        state: PolicyState,
        action: Action,
        reward: f64,
        next: PolicyState,
        learning_rate: f64,
        discount: f64,
    ) -> f64 {
        let current = self.value(state, action);
        let target = reward + discount * self.max_value(next);
        let updated = current + learning_rate * (target - current);
        self.values.insert((state, action), updated);
        updated
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Epsilon-greedy choice over the table.
pub fn select_action(
    table: &QTable,
    state: PolicyState,
    exploration_rate: f64,
    rng: &mut StdRng,
) -> Action {
    if rng.gen::<f64>() < exploration_rate {
        Action::ALL[rng.gen_range(0..Action::ALL.len())]
    } else {
        table.best_action(state)
    }
}
