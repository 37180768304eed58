use std::sync::Arc;
use std::thread;

use autovision::storage::{InMemoryJournal, SqliteStore, TrainingJournal};
use autovision::threshold::{
    Action, ControllerSettings, Feedback, ThresholdController, TrainingStatus, MAX_THRESHOLD,
    MIN_THRESHOLD,
};
use autovision::ControllerError;

fn controller(seed: u64) -> ThresholdController {
    ThresholdController::new(ControllerSettings {
        seed: Some(seed),
        exploration_rate: 0.3,
        ..ControllerSettings::default()
    })
    .expect("controller")
}

fn feedback_for(worker: u64, step: u64) -> Feedback {
    match (worker + step) % 4 {
        0 => Feedback::false_positive(Some(0.2)),
        1 => Feedback::true_positive(),
        2 => Feedback {
            false_negative: true,
            ..Feedback::default()
        },
        _ => Feedback::scored(0.8),
    }
}

#[test]
fn concurrent_adjustments_are_serialized() {
    let journal = Arc::new(InMemoryJournal::default());
    let controller = Arc::new(controller(99).with_journal(journal.clone()));

    let workers: Vec<_> = (0..8u64)
        .map(|worker| {
            let controller = controller.clone();
            thread::spawn(move || {
                for step in 0..50 {
                    let threshold = controller
                        .adjust(&feedback_for(worker, step))
                        .expect("adjust");
                    assert!((MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold));
                    let seen = controller.get_current_threshold();
                    assert!((MIN_THRESHOLD..=MAX_THRESHOLD).contains(&seen));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let metrics = controller.get_performance_metrics().unwrap();
    assert_eq!(metrics.total_adjustments, 400);
    assert_eq!(metrics.false_positives, 100);
    assert_eq!(metrics.true_positives, 100);
    assert_eq!(metrics.false_negatives, 100);
    assert_eq!(metrics.true_negatives, 0);
    assert_eq!(metrics.data_saved, 400);
    assert_eq!(journal.transition_count().unwrap(), 400);
    assert_eq!(metrics.current_threshold, controller.get_current_threshold());
}

#[test]
fn reset_keeps_learning_but_clears_counters() {
    let controller = controller(5);
    for step in 0..20 {
        controller.adjust(&feedback_for(0, step)).unwrap();
    }
    let before = controller.get_training_summary().unwrap();
    assert_eq!(before.training_status, TrainingStatus::Active);
    assert!(before.metrics.q_table_size > 0);

    controller.reset().unwrap();
    let after = controller.get_training_summary().unwrap();
    assert_eq!(after.metrics.current_threshold, 0.5);
    assert_eq!(controller.get_current_threshold(), 0.5);
    assert_eq!(after.metrics.total_adjustments, 0);
    assert_eq!(after.metrics.false_positives, 0);
    assert_eq!(after.training_status, TrainingStatus::Idle);
    assert_eq!(after.training_episodes, before.training_episodes);
    assert_eq!(after.metrics.q_table_size, before.metrics.q_table_size);
}

#[test]
fn invalid_feedback_leaves_state_untouched() {
    let controller = controller(1);
    let err = controller.adjust(&Feedback::scored(-1.5)).unwrap_err();
    assert!(matches!(err, ControllerError::InvalidFeedback(_)));
    assert_eq!(
        controller.get_performance_metrics().unwrap().total_adjustments,
        0
    );
}

#[test]
fn repeated_increases_hold_the_ceiling() {
    let journal = Arc::new(InMemoryJournal::default());
    let controller = ThresholdController::new(ControllerSettings {
        initial_threshold: MAX_THRESHOLD,
        exploration_rate: 1.0,
        seed: Some(41),
        ..ControllerSettings::default()
    })
    .expect("controller")
    .with_journal(journal.clone());

    let mut at_ceiling = 0;
    for _ in 0..200 {
        let before = controller.get_current_threshold();
        let threshold = controller.adjust(&Feedback::scored(0.5)).unwrap();
        let transitions = journal.transitions();
        let last = transitions.last().expect("transition");
        if before == MAX_THRESHOLD && last.action == Action::Increase.index() {
            at_ceiling += 1;
            assert_eq!(threshold, MAX_THRESHOLD);
            assert_eq!(controller.get_current_threshold(), MAX_THRESHOLD);
        }
        assert!(controller.get_current_threshold() <= MAX_THRESHOLD);
    }
    assert!(at_ceiling > 0);
}

#[test]
fn sqlite_journal_counts_transitions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("journal.db");
    let store = Arc::new(SqliteStore::open(path.to_str().unwrap()).expect("open store"));
    let controller = controller(12).with_journal(store.clone());

    for step in 0..5 {
        controller.adjust(&feedback_for(1, step)).unwrap();
    }
    assert_eq!(store.transition_count().unwrap(), 5);
    assert_eq!(controller.get_training_summary().unwrap().data_persisted, 5);
}
