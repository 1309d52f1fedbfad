use super::{
    LeaseTable, RunLease, Submission, SubmissionStore, check_mutable, sort_pending, sort_queued,
};
use crate::engine::{QueuedRun, Run};
use crate::error::StoreError;
use ahash::AHashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    runs: AHashMap<Uuid, Run>,
    submissions: AHashMap<Uuid, Submission>,
    queue: AHashMap<Uuid, QueuedRun>,
}

/// Keeps everything in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    leases: LeaseTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SubmissionStore for MemoryStore {
    fn acquire(&self, run_uuid: Uuid) -> Result<RunLease, StoreError> {
        self.leases.acquire(run_uuid)
    }

    fn persist(&self, run: &Run) -> Result<(), StoreError> {
        let mut state = self.state();
        check_mutable(state.runs.get(&run.run_uuid), run)?;
        state.runs.insert(run.run_uuid, run.clone());
        Ok(())
    }

    fn resume(&self, run_uuid: Uuid) -> Result<Run, StoreError> {
        self.state()
            .runs
            .get(&run_uuid)
            .cloned()
            .ok_or(StoreError::NotFound(run_uuid))
    }

    fn runs(&self) -> Result<Vec<Run>, StoreError> {
        Ok(self.state().runs.values().cloned().collect())
    }

    fn finalize(&self, run_uuid: Uuid) -> Result<Submission, StoreError> {
        let mut state = self.state();
        if let Some(existing) = state.submissions.get(&run_uuid) {
            return Ok(existing.clone());
        }
        let run = state
            .runs
            .get(&run_uuid)
            .ok_or(StoreError::NotFound(run_uuid))?;
        let submission = Submission::from_run(run)?;
        state.submissions.insert(run_uuid, submission.clone());
        Ok(submission)
    }

    fn list_pending(&self) -> Result<Vec<Submission>, StoreError> {
        let mut pending: Vec<Submission> = self.state().submissions.values().cloned().collect();
        sort_pending(&mut pending);
        Ok(pending)
    }

    fn confirm_uploaded(&self, run_uuid: Uuid) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.submissions.remove(&run_uuid).is_none() {
            return Err(StoreError::NotFound(run_uuid));
        }
        state.runs.remove(&run_uuid);
        Ok(())
    }

    fn discard(&self, run_uuid: Uuid) -> Result<(), StoreError> {
        let mut state = self.state();
        let had_run = state.runs.remove(&run_uuid).is_some();
        let had_submission = state.submissions.remove(&run_uuid).is_some();
        if had_run || had_submission {
            Ok(())
        } else {
            Err(StoreError::NotFound(run_uuid))
        }
    }

    fn enqueue(&self, request: &QueuedRun) -> Result<(), StoreError> {
        self.state()
            .queue
            .insert(request.request_uuid, request.clone());
        Ok(())
    }

    fn queued(&self) -> Result<Vec<QueuedRun>, StoreError> {
        let mut requests: Vec<QueuedRun> = self.state().queue.values().cloned().collect();
        sort_queued(&mut requests);
        Ok(requests)
    }

    fn dequeue(&self, request_uuid: Uuid) -> Result<(), StoreError> {
        self.state().queue.remove(&request_uuid);
        Ok(())
    }
}
