//! Operator feedback ingress.
//!
//! Feedback arrives as `(event_id, user_id, is_false_positive, feedback_score)`. It is
//! stored on the event row and translated into the controller's feedback shape:
//! only `false_positive` and `score` are ever set from this path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;
use crate::storage::{EventFeedback, EventId, EventStore};
use crate::threshold::{Feedback, ThresholdController, MAX_FEEDBACK_SCORE, MIN_FEEDBACK_SCORE};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub event_id: EventId,
    pub user_id: String,
    pub is_false_positive: bool,
    /// Operator rating in `[-1, 1]`.
    pub feedback_score: f64,
}

impl FeedbackRequest {
    pub fn to_controller_feedback(&self) -> Feedback {
        Feedback {
            false_positive: self.is_false_positive,
            score: Some(self.feedback_score),
            ..Feedback::default()
        }
    }
}

pub struct FeedbackIngress {
    events: Arc<dyn EventStore>,
    controller: Arc<ThresholdController>,
}

impl FeedbackIngress {
    pub fn new(events: Arc<dyn EventStore>, controller: Arc<ThresholdController>) -> Self {
        Self { events, controller }
    }

    /// Record feedback on an event and adjust the controller. Returns the new threshold.
    pub fn submit(&self, request: &FeedbackRequest) -> Result<f64, FeedbackError> {
        if !(MIN_FEEDBACK_SCORE..=MAX_FEEDBACK_SCORE).contains(&request.feedback_score) {
            return Err(FeedbackError::InvalidScore(request.feedback_score));
        }

        let event = self
            .events
            .event(request.event_id)
            .map_err(FeedbackError::Store)?
            .ok_or(FeedbackError::EventNotFound(request.event_id))?;
        if event.event.user_id != request.user_id {
            log::warn!(
                "user {} denied feedback on event {}",
                request.user_id,
                request.event_id
            );
            return Err(FeedbackError::AccessDenied {
                event_id: request.event_id,
                user_id: request.user_id.clone(),
            });
        }

        self.events
            .record_feedback(
                request.event_id,
                &EventFeedback {
                    user_id: request.user_id.clone(),
                    is_false_positive: request.is_false_positive,
                    feedback_score: request.feedback_score,
                },
            )
            .map_err(FeedbackError::Store)?;

        let threshold = self.controller.adjust(&request.to_controller_feedback())?;
        log::info!(
            "feedback on event {} (false positive: {}, score {:.2}); threshold now {:.3}",
            request.event_id,
            request.is_false_positive,
            request.feedback_score,
            threshold
        );
        Ok(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStore, NewEvent};
    use crate::threshold::{ControllerSettings, Outcome};

    fn setup() -> (FeedbackIngress, Arc<InMemoryStore>, Arc<ThresholdController>, EventId) {
        let store = Arc::new(InMemoryStore::default());
        let id = store
            .create_event(&NewEvent {
                video_id: "v1".to_string(),
                user_id: "owner".to_string(),
                event_type: "running".to_string(),
                anomaly_score: 0.66,
                confidence: 0.6,
                timestamp_seconds: 4.0,
                frame_number: 120,
                description: "Anomaly detected: running with score 0.66".to_string(),
                is_alert: false,
            })
            .unwrap();
        let controller = Arc::new(
            ThresholdController::new(ControllerSettings {
                seed: Some(21),
                ..ControllerSettings::default()
            })
            .unwrap(),
        );
        (
            FeedbackIngress::new(store.clone(), controller.clone()),
            store,
            controller,
            id,
        )
    }

    fn request(event_id: EventId, user_id: &str, score: f64) -> FeedbackRequest {
        FeedbackRequest {
            event_id,
            user_id: user_id.to_string(),
            is_false_positive: true,
            feedback_score: score,
        }
    }

    #[test]
    fn translation_only_sets_false_positive_and_score() {
        let feedback = request(1, "owner", 0.3).to_controller_feedback();
        assert!(feedback.false_positive);
        assert!(!feedback.false_negative && !feedback.true_positive && !feedback.true_negative);
        assert_eq!(feedback.score, Some(0.3));

        let mut confirmed = request(1, "owner", 0.9);
        confirmed.is_false_positive = false;
        // A confirmed detection still carries no true-positive signal.
        assert_eq!(confirmed.to_controller_feedback().outcome(), Outcome::Unlabelled);
    }

    #[test]
    fn feedback_is_stored_and_adjusts_controller() {
        let (ingress, store, controller, id) = setup();
        let threshold = ingress.submit(&request(id, "owner", 0.2)).unwrap();

        assert_eq!(threshold, controller.get_current_threshold());
        let counts = controller.counts().unwrap();
        assert_eq!(counts.false_positives, 1);

        let event = store.event(id).unwrap().unwrap();
        assert_eq!(event.is_false_positive, Some(true));
        assert_eq!(event.feedback_score, Some(0.2));
        assert_eq!(event.feedback_user_id.as_deref(), Some("owner"));
    }

    #[test]
    fn rejects_out_of_range_score() {
        let (ingress, _, controller, id) = setup();
        let err = ingress.submit(&request(id, "owner", 1.5)).unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidScore(_)));
        let err = ingress.submit(&request(id, "owner", -1.5)).unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidScore(_)));
        let err = ingress.submit(&request(id, "owner", f64::NAN)).unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidScore(_)));
        assert_eq!(controller.counts().unwrap().total(), 0);
    }

    #[test]
    fn negative_rating_adjusts_controller() {
        let (ingress, store, controller, id) = setup();
        let threshold = ingress.submit(&request(id, "owner", -0.8)).unwrap();

        assert_eq!(threshold, controller.get_current_threshold());
        let metrics = controller.get_performance_metrics().unwrap();
        assert_eq!(metrics.total_adjustments, 1);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(store.event(id).unwrap().unwrap().feedback_score, Some(-0.8));

        let mut unlabelled = request(id, "owner", -0.8);
        unlabelled.is_false_positive = false;
        ingress.submit(&unlabelled).unwrap();
        let metrics = controller.get_performance_metrics().unwrap();
        assert_eq!(metrics.total_adjustments, 2);
        assert!((metrics.total_reward - (-1.0 - 0.65)).abs() < 1e-12);
    }

    #[test]
    fn rejects_unknown_event() {
        let (ingress, _, _, _) = setup();
        let err = ingress.submit(&request(404, "owner", 0.5)).unwrap_err();
        assert!(matches!(err, FeedbackError::EventNotFound(404)));
    }

    #[test]
    fn rejects_other_users() {
        let (ingress, store, controller, id) = setup();
        let err = ingress.submit(&request(id, "intruder", 0.5)).unwrap_err();
        assert!(matches!(err, FeedbackError::AccessDenied { .. }));
        assert!(store.event(id).unwrap().unwrap().feedback_score.is_none());
        assert_eq!(
            controller.get_performance_metrics().unwrap().total_adjustments,
            0
        );
    }
}
