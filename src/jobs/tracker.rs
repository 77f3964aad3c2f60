//! Single writer for one job's record.
//!
//! Both cooperating tasks of a job (the pipeline and the progress reporter)
//! publish through the same `JobTracker`. Every write happens under one
//! mutex, which gives three guarantees on top of the store contract:
//! - percent never goes down while the job is running
//! - a non-terminal record never claims 100 %
//! - once a terminal record is published, every later write is dropped
//!
//! Store failures are logged and swallowed: progress is advisory and must not
//! abort the job.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::jobs::model::{JobId, JobState, JobStatus};
use crate::jobs::store::JobStore;

/// Highest percent a running job may report.
const RUNNING_PERCENT_CAP: u8 = 99;

pub struct JobTracker {
    id: JobId,
    store: Arc<dyn JobStore>,
    current: Mutex<JobState>,
}

impl JobTracker {
    /// `initial` must be what the store already holds for `id` (the queued record).
    pub fn new(id: JobId, store: Arc<dyn JobStore>, initial: JobState) -> Self {
        Self {
            id,
            store,
            current: Mutex::new(initial),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> JobState {
        self.lock().clone()
    }

    /// Record a pipeline stage. Keeps the current percent unless `percent` is higher.
    ///
    /// Returns `false` if the job is already terminal and nothing was written.
    pub fn checkpoint(&self, message: &str, percent: Option<u8>) -> bool {
        let mut current = self.lock();
        if current.is_terminal() {
            warn!(job_id = %self.id, stage = message, "Checkpoint after terminal state ignored");
            return false;
        }

        let percent = percent
            .unwrap_or(current.percent)
            .max(current.percent)
            .min(RUNNING_PERCENT_CAP);
        let next = JobState::processing(percent, message);
        self.persist(&next);
        *current = next;
        true
    }

    /// Heartbeat from the progress reporter: raise the percent, keep the stage message.
    ///
    /// Lower or equal values are not written. Returns `false` once the job is
    /// terminal so the reporter can stop on its own.
    pub fn advance(&self, percent: u8) -> bool {
        let mut current = self.lock();
        if current.is_terminal() {
            return false;
        }

        let percent = percent.min(RUNNING_PERCENT_CAP);
        if current.status == JobStatus::Processing && percent <= current.percent {
            return true;
        }

        let message = if current.status == JobStatus::Queued {
            "A processar...".to_string()
        } else {
            current.message.clone()
        };
        let next = JobState::processing(percent.max(current.percent), message);
        self.persist(&next);
        *current = next;
        true
    }

    /// Publish the terminal record. Only the first call has any effect.
    pub fn finish(&self, outcome: JobState) {
        debug_assert!(outcome.is_terminal(), "finish() needs a terminal state");

        let mut current = self.lock();
        if current.is_terminal() {
            warn!(job_id = %self.id, "Job already finished, dropping second outcome");
            return;
        }

        self.persist(&outcome);
        *current = outcome;
    }

    fn persist(&self, state: &JobState) {
        match self.store.write(&self.id, state) {
            Ok(()) => debug!(
                job_id = %self.id,
                status = state.status.as_str(),
                percent = state.percent,
                "Job state written"
            ),
            Err(e) => warn!(job_id = %self.id, error = %e, "Failed to write job state, continuing"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        // The guarded value is always a complete record, so a poisoned lock is still usable
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
