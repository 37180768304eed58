use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use autovision::detect::ScriptedScorer;
use autovision::ingest::FileOpener;
use autovision::jobs::{JobState, RunnerSettings, VideoJob, VideoJobRunner};
use autovision::pipeline::{AnomalyType, FramePipeline};
use autovision::storage::{EventStore, SqliteStore, VideoStatus, VideoStore};
use autovision::threshold::{ControllerSettings, ThresholdController};
use autovision::{AnalyticsParts, KnowledgeBaseRetriever, VideoAnalytics};

fn controller() -> Arc<ThresholdController> {
    Arc::new(
        ThresholdController::new(ControllerSettings {
            seed: Some(3),
            ..ControllerSettings::default()
        })
        .expect("controller"),
    )
}

fn every_fiftieth(index: u64) -> f64 {
    if index % 50 == 0 {
        0.85
    } else {
        0.2
    }
}

#[test]
fn thousand_frame_video_produces_twenty_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("autovision.db");
    let store = Arc::new(SqliteStore::open(db.to_str().unwrap()).expect("open store"));

    let pipeline = FramePipeline::new(
        Box::new(ScriptedScorer::new(0.5, every_fiftieth)),
        Arc::new(KnowledgeBaseRetriever::default()),
        controller(),
    );
    let mut runner = VideoJobRunner::new(
        RunnerSettings::default(),
        Arc::new(FileOpener),
        pipeline,
        store.clone(),
        store.clone(),
    );
    let path = "stub://gate?frames=1000&fps=25&width=16&height=12";
    let job = VideoJob {
        video_id: store.register_video("guard", path).unwrap(),
        user_id: "guard".to_string(),
        path: path.to_string(),
    };

    let report = runner.run(&job, &AtomicBool::new(false)).expect("job");

    assert_eq!(report.frames_decoded, 1000);
    assert_eq!(report.frames_scored, 200);
    assert_eq!(report.degraded_frames, 0);
    assert_eq!(report.anomalies, 20);
    assert_eq!(report.high_risk_events, 20);
    assert_eq!(report.events_persisted, 20);
    assert_eq!(report.events_failed, 0);
    assert_eq!(report.anomaly_types.get("intrusion"), Some(&20));

    let events = store.events_for_video(&job.video_id).unwrap();
    assert_eq!(events.len(), 20);
    assert!(events.iter().all(|e| e.event.is_alert));
    assert_eq!(events[1].event.frame_number, 50);
    assert!((events[1].event.timestamp_seconds - 2.0).abs() < 1e-9);
    assert_eq!(
        store.video(&job.video_id).unwrap().unwrap().status,
        VideoStatus::Completed
    );

    for record in report.records.iter().filter(|r| r.is_anomaly) {
        assert_eq!(record.anomaly_type, AnomalyType::Intrusion);
        assert!(!record.summary.is_empty());
        assert!(record.context.is_some());
    }
}

#[test]
fn non_finite_scores_degrade_single_frames() {
    let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
    let service = VideoAnalytics::new(AnalyticsParts {
        scorer: Box::new(ScriptedScorer::new(0.5, |i| {
            if i == 100 {
                f64::NAN
            } else {
                every_fiftieth(i)
            }
        })),
        retriever: Arc::new(KnowledgeBaseRetriever::default()),
        controller: controller(),
        events: store.clone(),
        videos: store.clone(),
        opener: Arc::new(FileOpener),
        runner: RunnerSettings::default(),
    })
    .expect("service");

    let handle = service
        .submit_video("guard", "stub://yard?frames=300&width=8&height=8")
        .unwrap();
    let JobState::Completed(report) = handle.wait() else {
        panic!("job did not complete");
    };

    assert_eq!(report.frames_scored, 60);
    assert_eq!(report.degraded_frames, 1);
    assert_eq!(report.anomalies, 5);
    let degraded = report
        .records
        .iter()
        .find(|r| r.frame_number == 100)
        .unwrap();
    assert!(degraded.is_degraded());
    assert_eq!(degraded.anomaly_type, AnomalyType::Unknown);
    assert!(!degraded.is_anomaly);

    let analysis = service.video_analysis(handle.video_id(), "guard").unwrap();
    assert_eq!(analysis.summary.total_events, 5);
    service.shutdown().unwrap();
}

#[test]
fn queue_reports_failures_without_stopping() {
    let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
    let service = VideoAnalytics::new(AnalyticsParts {
        scorer: Box::new(ScriptedScorer::new(0.5, every_fiftieth)),
        retriever: Arc::new(KnowledgeBaseRetriever::default()),
        controller: controller(),
        events: store.clone(),
        videos: store.clone(),
        opener: Arc::new(FileOpener),
        runner: RunnerSettings::default(),
    })
    .expect("service");

    let broken = service
        .submit_video("guard", "stub://a?frames=200&fail_at=120&width=4&height=4")
        .unwrap();
    let healthy = service
        .submit_video("guard", "stub://b?frames=100&width=4&height=4")
        .unwrap();

    assert!(matches!(broken.wait(), JobState::Failed(_)));
    assert!(matches!(healthy.wait(), JobState::Completed(_)));
    assert_eq!(
        store.video(broken.video_id()).unwrap().unwrap().status,
        VideoStatus::Failed
    );
    // Events are only written after a full decode.
    assert!(store.events_for_video(broken.video_id()).unwrap().is_empty());

    let status = service.system_status().unwrap();
    assert_eq!(status.statistics.videos_processed, 1);
    assert_eq!(status.statistics.videos_failed, 1);
    assert_eq!(status.queue_size, 0);
    service.shutdown().unwrap();
}
