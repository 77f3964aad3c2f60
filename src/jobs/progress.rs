//! # Progress Reporter
//!
//! Heartbeat task that keeps a job's percent moving while the pipeline works.
//!
//! The dominant stage (transcription) gives no progress signal and its
//! duration cannot be predicted, so the percent published here is
//! **illustrative, not measured**: it starts at `start`, grows by `step`
//! every `interval`, and stalls at `ceiling` (below 100) until the pipeline
//! publishes the real outcome.
//!
//! ## Lifecycle:
//! 1. [`ProgressReporter::spawn`] starts the task next to the pipeline
//! 2. The pipeline finishes (successfully or not)
//! 3. [`ReporterHandle::stop`] cancels the token and joins with a bounded wait,
//!    aborting the task if the wait expires
//! 4. Only then does the job publish its terminal record
//!
//! Step 3 happening before step 4 is what keeps a late heartbeat from landing
//! on top of a `done`/`error` record. `JobTracker` also drops any write after
//! the terminal one, so an aborted-but-still-running heartbeat is harmless.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jobs::tracker::JobTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSettings {
    pub start: u8,
    pub step: u8,
    pub ceiling: u8,
    pub interval: Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            start: 3,
            step: 4,
            ceiling: 95,
            interval: Duration::from_secs(2),
        }
    }
}

impl ProgressSettings {
    /// Next heartbeat value after `current`.
    pub fn next_percent(&self, current: u8) -> u8 {
        current.saturating_add(self.step).min(self.ceiling)
    }
}

pub struct ProgressReporter;

impl ProgressReporter {
    pub fn spawn(tracker: Arc<JobTracker>, settings: ProgressSettings) -> ReporterHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(tracker, settings, cancel.clone()));
        ReporterHandle { cancel, task }
    }
}

async fn run(tracker: Arc<JobTracker>, settings: ProgressSettings, cancel: CancellationToken) {
    let mut percent = settings.start.min(settings.ceiling);
    if !tracker.advance(percent) {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }

        percent = settings.next_percent(percent);
        if !tracker.advance(percent) {
            break;
        }
    }

    debug!(job_id = %tracker.id(), last_percent = percent, "Progress reporter stopped");
}

/// Owned by the job task; dropping it without `stop` leaves the reporter running.
pub struct ReporterHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReporterHandle {
    /// Cancel and join. Returns `false` if the task had to be aborted.
    pub async fn stop(self, timeout: Duration) -> bool {
        self.cancel.cancel();

        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Progress reporter task failed");
                true
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Progress reporter did not stop in time, aborting");
                task.abort();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{JobId, JobState, JobStatus};
    use crate::jobs::store::{JobStore, StoreError};
    use std::sync::Mutex;

    /// Keeps every write so tests can inspect the whole sequence.
    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<JobState>>,
    }

    impl JobStore for RecordingStore {
        fn create(&self, id: &JobId, state: &JobState) -> Result<(), StoreError> {
            self.write(id, state)
        }
        fn write(&self, _: &JobId, state: &JobState) -> Result<(), StoreError> {
            self.writes.lock().unwrap().push(state.clone());
            Ok(())
        }
        fn read(&self, _: &JobId) -> Result<Option<JobState>, StoreError> {
            Ok(self.writes.lock().unwrap().last().cloned())
        }
        fn backend(&self) -> &'static str {
            "recording"
        }
    }

    fn fast_settings() -> ProgressSettings {
        ProgressSettings {
            start: 3,
            step: 4,
            ceiling: 15,
            interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_next_percent_is_clamped() {
        let settings = ProgressSettings::default();
        assert_eq!(settings.next_percent(3), 7);
        assert_eq!(settings.next_percent(93), 95);
        assert_eq!(settings.next_percent(95), 95);
        assert_eq!(settings.next_percent(254), 95);
    }

    #[tokio::test]
    async fn test_reporter_climbs_to_ceiling_and_stops() {
        let store = Arc::new(RecordingStore::default());
        let tracker = Arc::new(JobTracker::new(JobId::generate(), store.clone(), JobState::queued()));

        let handle = ProgressReporter::spawn(tracker.clone(), fast_settings());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(handle.stop(Duration::from_secs(1)).await);

        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(writes.first().map(|s| s.percent), Some(3));
        assert!(writes.iter().all(|s| s.status == JobStatus::Processing));
        assert!(writes.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(writes.last().map(|s| s.percent), Some(15));
    }

    #[tokio::test]
    async fn test_no_heartbeat_after_stop() {
        let store = Arc::new(RecordingStore::default());
        let tracker = Arc::new(JobTracker::new(JobId::generate(), store.clone(), JobState::queued()));

        let handle = ProgressReporter::spawn(tracker.clone(), fast_settings());
        tokio::time::sleep(Duration::from_millis(12)).await;
        handle.stop(Duration::from_secs(1)).await;
        tracker.finish(JobState::failed("conversion failed"));

        let count = store.writes.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), count);
        assert_eq!(writes.last(), Some(&JobState::failed("conversion failed")));
    }

    #[tokio::test]
    async fn test_reporter_exits_on_terminal_job() {
        let store = Arc::new(RecordingStore::default());
        let tracker = Arc::new(JobTracker::new(JobId::generate(), store.clone(), JobState::queued()));
        tracker.finish(JobState::done("ok", None));

        let handle = ProgressReporter::spawn(tracker, fast_settings());
        assert!(handle.stop(Duration::from_millis(200)).await);
        assert_eq!(store.writes.lock().unwrap().len(), 1);
    }
}
