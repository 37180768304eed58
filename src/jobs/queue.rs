use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::runner::{VideoJob, VideoJobRunner};
use super::stats::{JobReport, ProcessorStats};
use crate::error::JobError;

/// Lifecycle of a submitted job.
#[derive(Clone, Debug, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Completed(JobReport),
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Completed(_) | JobState::Failed(_) | JobState::Cancelled
        )
    }
}

struct JobShared {
    id: u64,
    video_id: String,
    state: Mutex<JobState>,
    finished: Condvar,
    cancel: AtomicBool,
}

impl JobShared {
    fn set_state(&self, state: JobState) {
        match self.state.lock() {
            Ok(mut current) => *current = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
        self.finished.notify_all();
    }
}

/// Caller's view of a queued job.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn video_id(&self) -> &str {
        &self.shared.video_id
    }

    pub fn state(&self) -> JobState {
        match self.shared.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Request cancellation. A running job stops at its next yield point.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    /// Block until the job finishes.
    pub fn wait(&self) -> JobState {
        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !state.is_finished() {
            state = match self.shared.finished.wait(state) {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        state.clone()
    }

    /// Block until the job finishes or `timeout` elapses. `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobState> {
        let guard = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (state, _) = match self
            .shared
            .finished
            .wait_timeout_while(guard, timeout, |s| !s.is_finished())
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.is_finished().then(|| state.clone())
    }
}

struct QueuedJob {
    job: VideoJob,
    shared: Arc<JobShared>,
}

/// FIFO job queue drained by a single background worker.
pub struct JobQueue {
    sender: Option<Sender<QueuedJob>>,
    worker: Option<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    processing: Arc<AtomicBool>,
    next_id: AtomicU64,
    stats: Arc<ProcessorStats>,
}

impl JobQueue {
    pub fn start(runner: VideoJobRunner) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let processing = Arc::new(AtomicBool::new(false));
        let stats = runner.stats();

        let worker = {
            let pending = pending.clone();
            let processing = processing.clone();
            thread::Builder::new()
                .name("autovision-jobs".to_string())
                .spawn(move || worker_loop(runner, receiver, pending, processing))
                .map_err(|e| anyhow!("failed to spawn job worker: {}", e))?
        };

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            pending,
            processing,
            next_id: AtomicU64::new(1),
            stats,
        })
    }

    /// Enqueue a job and return immediately.
    pub fn submit(&self, job: VideoJob) -> Result<JobHandle, JobError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| JobError::Queue("queue is shut down".to_string()))?;
        let shared = Arc::new(JobShared {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            video_id: job.video_id.clone(),
            state: Mutex::new(JobState::Queued),
            finished: Condvar::new(),
            cancel: AtomicBool::new(false),
        });
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender
            .send(QueuedJob {
                job,
                shared: shared.clone(),
            })
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(JobError::Queue("job worker stopped".to_string()));
        }
        log::info!(
            "queued job {} for video {} ({} pending)",
            shared.id,
            shared.video_id,
            self.queue_size()
        );
        Ok(JobHandle { shared })
    }

    /// Jobs waiting behind the active one.
    pub fn queue_size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }

    /// Stop accepting jobs, drain what is queued and join the worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("job worker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("job queue shutdown: {}", e);
        }
    }
}

fn worker_loop(
    mut runner: VideoJobRunner,
    receiver: Receiver<QueuedJob>,
    pending: Arc<AtomicUsize>,
    processing: Arc<AtomicBool>,
) {
    for QueuedJob { job, shared } in receiver {
        pending.fetch_sub(1, Ordering::SeqCst);
        if shared.cancel.load(Ordering::SeqCst) {
            log::info!("job {} cancelled before start", shared.id);
            runner.abandon(&job);
            shared.set_state(JobState::Cancelled);
            continue;
        }

        processing.store(true, Ordering::SeqCst);
        shared.set_state(JobState::Running);
        let outcome = runner.run(&job, &shared.cancel);
        processing.store(false, Ordering::SeqCst);

        shared.set_state(match outcome {
            Ok(report) => JobState::Completed(report),
            Err(JobError::Cancelled { .. }) => JobState::Cancelled,
            Err(e) => JobState::Failed(e.to_string()),
        });
    }
    log::debug!("job worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::KnowledgeBaseRetriever;
    use crate::detect::ScriptedScorer;
    use crate::ingest::FileOpener;
    use crate::jobs::RunnerSettings;
    use crate::pipeline::FramePipeline;
    use crate::storage::{InMemoryStore, VideoStore};
    use crate::threshold::{ControllerSettings, ThresholdController};

    fn queue(store: Arc<InMemoryStore>) -> JobQueue {
        let controller = Arc::new(
            ThresholdController::new(ControllerSettings {
                seed: Some(8),
                ..ControllerSettings::default()
            })
            .unwrap(),
        );
        let pipeline = FramePipeline::new(
            Box::new(ScriptedScorer::new(0.5, |i| if i % 50 == 0 { 0.9 } else { 0.2 })),
            Arc::new(KnowledgeBaseRetriever::default()),
            controller,
        );
        let runner = VideoJobRunner::new(
            RunnerSettings::default(),
            Arc::new(FileOpener),
            pipeline,
            store.clone(),
            store,
        );
        JobQueue::start(runner).unwrap()
    }

    fn job(store: &InMemoryStore, path: &str) -> VideoJob {
        VideoJob {
            video_id: store.register_video("user-1", path).unwrap(),
            user_id: "user-1".to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn jobs_complete_in_submission_order() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(store.clone());

        let first = queue
            .submit(job(&store, "stub://a?frames=200&width=4&height=4"))
            .unwrap();
        let second = queue
            .submit(job(&store, "stub://b?frames=100&width=4&height=4"))
            .unwrap();
        assert!(second.id() > first.id());

        let JobState::Completed(report) = second.wait() else {
            panic!("second job did not complete");
        };
        assert_eq!(report.frames_decoded, 100);
        // FIFO: the first job finished before the second.
        assert!(first.state().is_finished());
        assert!(matches!(first.wait(), JobState::Completed(_)));

        queue.shutdown().unwrap();
        assert_eq!(store.event_count(), 4 + 2);
    }

    #[test]
    fn failed_job_reports_error_and_queue_continues() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(store.clone());

        let broken = queue
            .submit(job(&store, "stub://a?frames=20&fail_at=3&width=4&height=4"))
            .unwrap();
        let healthy = queue
            .submit(job(&store, "stub://b?frames=10&width=4&height=4"))
            .unwrap();

        match broken.wait() {
            JobState::Failed(message) => assert!(message.contains("decode failed at frame 3")),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(matches!(healthy.wait(), JobState::Completed(_)));
        let stats = queue.stats().snapshot();
        assert_eq!(stats.videos_processed, 1);
        assert_eq!(stats.videos_failed, 1);
    }

    #[test]
    fn cancelled_job_ends_cancelled() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(store.clone());

        let handle = queue
            .submit(job(&store, "stub://a?frames=100000&width=4&height=4"))
            .unwrap();
        handle.cancel();
        assert_eq!(handle.wait(), JobState::Cancelled);
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let store = Arc::new(InMemoryStore::default());
        let mut queue = queue(store.clone());
        queue.stop().unwrap();
        let err = queue
            .submit(job(&store, "stub://a?frames=1"))
            .err()
            .unwrap();
        assert!(matches!(err, JobError::Queue(_)));
    }
}
