use crate::engine::{QueuedRun, Run, RunStatus};
use crate::error::StoreError;
use ahash::AHashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

mod file;
mod memory;
mod submission;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use submission::Submission;

/// Durable home of every run and finalized submission.
///
/// Implementations acknowledge a write only once it is durable, and refuse to
/// change a run that has already been persisted as `Completed`.
pub trait SubmissionStore: Send + Sync {
    /// Takes the exclusive right to step a run. Fails with `StoreError::Busy` while
    /// another lease on the same run is alive.
    fn acquire(&self, run_uuid: Uuid) -> Result<RunLease, StoreError>;

    /// Writes the full run, replacing any earlier record with the same uuid.
    fn persist(&self, run: &Run) -> Result<(), StoreError>;

    /// Reads a run back exactly as it was last persisted.
    fn resume(&self, run_uuid: Uuid) -> Result<Run, StoreError>;

    /// Every stored run, in no particular order.
    fn runs(&self) -> Result<Vec<Run>, StoreError>;

    /// Freezes a completed run into a submission record. Finalizing twice returns
    /// the same submission.
    fn finalize(&self, run_uuid: Uuid) -> Result<Submission, StoreError>;

    /// Finalized submissions awaiting upload, oldest completion first.
    fn list_pending(&self) -> Result<Vec<Submission>, StoreError>;

    /// Drops a submission and its run once the server has accepted it.
    fn confirm_uploaded(&self, run_uuid: Uuid) -> Result<(), StoreError>;

    /// Drops a run and any submission made from it.
    fn discard(&self, run_uuid: Uuid) -> Result<(), StoreError>;

    /// Records a child run request. Recording the same `request_uuid` again
    /// replaces the earlier record.
    fn enqueue(&self, request: &QueuedRun) -> Result<(), StoreError>;

    /// Child run requests not yet started, in request order.
    fn queued(&self) -> Result<Vec<QueuedRun>, StoreError>;

    /// Drops a child run request. Dropping an unknown request is a no-op.
    fn dequeue(&self, request_uuid: Uuid) -> Result<(), StoreError>;

    fn completed_count(&self, org_uuid: &str, flow_uuid: &str) -> Result<usize, StoreError> {
        Ok(self
            .list_pending()?
            .iter()
            .filter(|s| s.org_uuid == org_uuid && s.flow_uuid == flow_uuid)
            .count())
    }
}

/// Tracks which runs are currently leased.
#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    held: Arc<Mutex<AHashSet<Uuid>>>,
}

impl LeaseTable {
    pub fn acquire(&self, run_uuid: Uuid) -> Result<RunLease, StoreError> {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(run_uuid) {
            return Err(StoreError::Busy(run_uuid));
        }
        Ok(RunLease {
            run_uuid,
            held: Arc::clone(&self.held),
        })
    }
}

/// Exclusive right to step one run; released on drop.
#[derive(Debug)]
pub struct RunLease {
    run_uuid: Uuid,
    held: Arc<Mutex<AHashSet<Uuid>>>,
}

impl RunLease {
    pub fn run_uuid(&self) -> Uuid {
        self.run_uuid
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.run_uuid);
    }
}

/// Rejects a write that would change a run already persisted as completed.
pub(crate) fn check_mutable(existing: Option<&Run>, run: &Run) -> Result<(), StoreError> {
    match existing {
        Some(stored) if stored.status == RunStatus::Completed && stored != run => {
            Err(StoreError::Immutable(run.run_uuid))
        }
        _ => Ok(()),
    }
}

/// Oldest completion first; ties broken by run uuid so the order is total.
pub(crate) fn sort_pending(submissions: &mut [Submission]) {
    submissions.sort_by(|a, b| {
        a.completed_on
            .cmp(&b.completed_on)
            .then_with(|| a.run_uuid.cmp(&b.run_uuid))
    });
}

/// Request order: oldest first, then by parent run and the step and action that asked.
pub(crate) fn sort_queued(requests: &mut [QueuedRun]) {
    requests.sort_by(|a, b| {
        a.requested_on
            .cmp(&b.requested_on)
            .then_with(|| a.parent_run.cmp(&b.parent_run))
            .then_with(|| a.step_index.cmp(&b.step_index))
            .then_with(|| a.position.cmp(&b.position))
    });
}
