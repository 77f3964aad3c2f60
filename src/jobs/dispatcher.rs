//! # Job Dispatcher
//!
//! Accepts uploads, hands back a job id right away and runs each job on its
//! own tokio task.
//!
//! ## Job Task Ordering:
//! 1. Spawn the progress reporter
//! 2. Run the pipeline to completion (success, error or panic)
//! 3. Stop the reporter: cancel, then join with a bounded wait
//! 4. Delete the job's temporary files
//! 5. Publish the terminal record
//!
//! A client that sees a terminal record can therefore rely on the temporary
//! files being gone and on no heartbeat overwriting it.

use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::jobs::model::{JobId, JobState};
use crate::jobs::progress::{ProgressReporter, ProgressSettings};
use crate::jobs::store::{JobStore, StoreError};
use crate::jobs::tracker::JobTracker;
use crate::pipeline::{JobArtifacts, Pipeline, PipelineOutcome, UploadedArtifact};

#[derive(Debug, Default)]
struct JobCounters {
    submitted: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct JobCountersSnapshot {
    pub submitted: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
    scratch_dir: std::path::PathBuf,
    progress: ProgressSettings,
    reporter_join_timeout: Duration,
    counters: Arc<JobCounters>,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        pipeline: Arc<Pipeline>,
        scratch_dir: impl Into<std::path::PathBuf>,
        progress: ProgressSettings,
        reporter_join_timeout: Duration,
    ) -> Self {
        Self {
            store,
            pipeline,
            scratch_dir: scratch_dir.into(),
            progress,
            reporter_join_timeout,
            counters: Arc::new(JobCounters::default()),
        }
    }

    /// Register a job for `upload` and start it in the background.
    ///
    /// The `queued` record is written before this returns, so polling the
    /// returned id never yields not-found. If that write fails no job exists
    /// and the upload is deleted.
    pub fn submit(&self, upload: UploadedArtifact) -> Result<JobId, StoreError> {
        let id = JobId::generate();
        let initial = JobState::queued();
        self.store.create(&id, &initial)?;

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);

        info!(
            job_id = %id,
            file = upload.original_name(),
            bytes = upload.size(),
            "Job queued"
        );

        let tracker = Arc::new(JobTracker::new(id.clone(), self.store.clone(), initial));
        let job = JobRun {
            tracker,
            pipeline: self.pipeline.clone(),
            artifacts: JobArtifacts::new(upload, self.scratch_dir.clone()),
            progress: self.progress,
            reporter_join_timeout: self.reporter_join_timeout,
            counters: self.counters.clone(),
        };
        tokio::spawn(job.run());

        Ok(id)
    }

    /// Current record for `id`, verbatim.
    pub fn status(&self, id: &JobId) -> Result<Option<JobState>, StoreError> {
        self.store.read(id)
    }

    pub fn counters(&self) -> JobCountersSnapshot {
        JobCountersSnapshot {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }
}

/// Everything one job task owns.
struct JobRun {
    tracker: Arc<JobTracker>,
    pipeline: Arc<Pipeline>,
    artifacts: JobArtifacts,
    progress: ProgressSettings,
    reporter_join_timeout: Duration,
    counters: Arc<JobCounters>,
}

impl JobRun {
    async fn run(mut self) {
        let started = Instant::now();
        let job_id = self.tracker.id().clone();

        let reporter = ProgressReporter::spawn(self.tracker.clone(), self.progress);

        let outcome = AssertUnwindSafe(self.pipeline.execute(&self.tracker, &mut self.artifacts))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("falha interna no processamento")));

        if !reporter.stop(self.reporter_join_timeout).await {
            warn!(job_id = %job_id, "Progress reporter was aborted");
        }

        let intermediates = self.artifacts.intermediate_count();
        let removed = self.artifacts.cleanup();
        debug!(job_id = %job_id, intermediates, removed, "Temporary files cleaned up");

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(PipelineOutcome {
                message,
                filename,
                transcript_chars,
            }) => {
                info!(
                    job_id = %job_id,
                    file = %filename,
                    transcript_chars,
                    removed_files = removed,
                    elapsed_ms,
                    "Job finished"
                );
                self.tracker.finish(JobState::done(message, Some(filename)));
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(job_id = %job_id, error = %format!("{:#}", e), removed_files = removed, elapsed_ms, "Job failed");
                self.tracker.finish(JobState::failed(format!("Erro: {:#}", e)));
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::docx::{Block, DocxDocument};
    use crate::jobs::model::JobStatus;
    use crate::jobs::store::MemoryJobStore;
    use crate::pipeline::tests::{pipeline_in, FakeConverter};
    use crate::transcription::engine::tests::engine_with;
    use std::path::Path;

    struct Harness {
        scratch: tempfile::TempDir,
        media: tempfile::TempDir,
        dispatcher: JobDispatcher,
    }

    fn harness() -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(
            media.path(),
            Arc::new(FakeConverter::default()),
            engine_with("olá", false),
        );
        let dispatcher = JobDispatcher::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(pipeline),
            scratch.path(),
            ProgressSettings {
                interval: Duration::from_millis(5),
                ..ProgressSettings::default()
            },
            Duration::from_secs(1),
        );
        Harness {
            scratch,
            media,
            dispatcher,
        }
    }

    fn upload(dir: &Path, name: &str, bytes: &[u8]) -> UploadedArtifact {
        UploadedArtifact::from_bytes(dir, name, bytes).unwrap()
    }

    async fn wait_terminal(dispatcher: &JobDispatcher, id: &JobId) -> JobState {
        for _ in 0..400 {
            let state = dispatcher.status(id).unwrap().unwrap();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never finished", id);
    }

    fn entries_in(dir: &Path, name: &str) -> usize {
        DocxDocument::open(&dir.join(name))
            .unwrap()
            .blocks()
            .unwrap()
            .iter()
            .filter(|b| matches!(b, Block::Heading(2, _)))
            .count()
    }

    #[tokio::test]
    async fn test_wav_upload_completes() {
        let h = harness();
        let id = h
            .dispatcher
            .submit(upload(h.scratch.path(), "voz.wav", b"audio"))
            .unwrap();

        let state = wait_terminal(&h.dispatcher, &id).await;
        assert_eq!(state.status, JobStatus::Done);
        assert_eq!(state.percent, 100);
        assert_eq!(state.message, crate::pipeline::SUCCESS_MESSAGE);

        let filename = state.filename.unwrap();
        assert!(filename.starts_with("transcricao_") && filename.ends_with(".docx"));
        assert_eq!(entries_in(h.media.path(), &filename), 1);

        // temporary files are gone once the record is terminal
        assert_eq!(std::fs::read_dir(h.scratch.path()).unwrap().count(), 0);

        let counters = h.dispatcher.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.active, 0);
    }

    #[tokio::test]
    async fn test_status_is_queued_right_after_submit() {
        let h = harness();
        let id = h
            .dispatcher
            .submit(upload(h.scratch.path(), "voz.wav", b"audio"))
            .unwrap();

        // the job task cannot run before this task yields
        let state = h.dispatcher.status(&id).unwrap().unwrap();
        assert_eq!((state.status, state.percent), (JobStatus::Queued, 0));
        assert_eq!(state.message, "A preparar...");
        assert!(state.filename.is_none());
        wait_terminal(&h.dispatcher, &id).await;
    }

    #[tokio::test]
    async fn test_corrupt_video_ends_in_error() {
        let h = harness();
        let id = h
            .dispatcher
            .submit(upload(h.scratch.path(), "filme.mp4", b"corrupt payload"))
            .unwrap();

        let state = wait_terminal(&h.dispatcher, &id).await;
        assert_eq!(state.status, JobStatus::Error);
        assert_eq!(state.percent, 100);
        assert!(state.message.starts_with("Erro: "));
        assert!(state.message.len() > "Erro: ".len());
        assert!(state.filename.is_none());

        assert_eq!(std::fs::read_dir(h.scratch.path()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(h.media.path()).unwrap().count(), 0);
        assert_eq!(h.dispatcher.counters().failed, 1);
    }

    #[tokio::test]
    async fn test_terminal_record_is_stable_across_polls() {
        let h = harness();
        let done_id = h
            .dispatcher
            .submit(upload(h.scratch.path(), "voz.wav", b"audio"))
            .unwrap();
        let failed_id = h
            .dispatcher
            .submit(upload(h.scratch.path(), "filme.mp4", b"corrupt payload"))
            .unwrap();

        let done = wait_terminal(&h.dispatcher, &done_id).await;
        let failed = wait_terminal(&h.dispatcher, &failed_id).await;
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(failed.status, JobStatus::Error);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.dispatcher.status(&done_id).unwrap().unwrap(), done);
        assert_eq!(h.dispatcher.status(&failed_id).unwrap().unwrap(), failed);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let h = harness();
        assert!(h.dispatcher.status(&JobId::generate()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_are_independent() {
        let h = harness();
        let first = h
            .dispatcher
            .submit(upload(h.scratch.path(), "a.wav", b"one"))
            .unwrap();
        let second = h
            .dispatcher
            .submit(upload(h.scratch.path(), "b.mkv", b"two"))
            .unwrap();
        assert_ne!(first, second);

        let a = wait_terminal(&h.dispatcher, &first).await;
        let b = wait_terminal(&h.dispatcher, &second).await;
        assert_eq!(a.status, JobStatus::Done);
        assert_eq!(b.status, JobStatus::Done);

        let (fa, fb) = (a.filename.unwrap(), b.filename.unwrap());
        assert_ne!(fa, fb);
        assert_eq!(entries_in(h.media.path(), &fa) + entries_in(h.media.path(), &fb), 2);
        assert_eq!(h.dispatcher.counters().submitted, 2);
    }

    #[tokio::test]
    async fn test_percent_never_decreases() {
        let h = harness();
        let id = h
            .dispatcher
            .submit(upload(h.scratch.path(), "voz.wav", b"audio"))
            .unwrap();

        let mut last = 0;
        loop {
            let state = h.dispatcher.status(&id).unwrap().unwrap();
            assert!(state.percent >= last, "{} < {}", state.percent, last);
            last = state.percent;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(last, 100);
    }
}
