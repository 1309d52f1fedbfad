//! The run state machine and the engine that drives it.
//!
//! [`Engine`] owns the collaborators a run needs: the flow source, the submission
//! store, the clock and the organization context. Every public operation names
//! its run explicitly, holds the store's lease on that run while it works, and
//! persists the run before returning.

pub mod clock;
pub(crate) mod machine;
pub mod run;
pub mod source;

pub use clock::{Clock, ManualClock, SystemClock};
pub use run::{AsyncOutcome, AsyncWait, QueuedRun, Run, RunStatus, Step, StepError, StepErrorKind};
pub use source::{FlowSource, MemoryFlowSource};

use crate::config::EngineConfig;
use crate::data::{ContactContext, OrgContext};
use crate::error::{EngineError, EvaluationError, StoreError};
use crate::flow::{Flow, SpecVersion, probe_version};
use crate::legacy::LegacyArchive;
use crate::loader::FlowLoader;
use crate::store::{Submission, SubmissionStore};
use ahash::AHashMap;
use machine::{Machine, Transition};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

type FlowCache = AHashMap<(String, u32), Arc<Flow>>;

/// What a caller needs to list a flow before starting it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub uuid: String,
    pub spec_version: SpecVersion,
    pub supported: bool,
    /// `None` when the flow was not loaded because its version is unsupported.
    pub name: Option<String>,
    pub revision: Option<u32>,
    pub question_count: Option<usize>,
    /// Finalized submissions awaiting upload, including the legacy archive.
    pub completed_count: usize,
}

pub struct Engine {
    org: OrgContext,
    store: Arc<dyn SubmissionStore>,
    flows: Arc<dyn FlowSource>,
    loader: FlowLoader,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    legacy: Option<LegacyArchive>,
    cache: Mutex<FlowCache>,
}

pub struct EngineBuilder {
    org: OrgContext,
    store: Arc<dyn SubmissionStore>,
    flows: Arc<dyn FlowSource>,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    loader: Option<FlowLoader>,
    legacy: Option<LegacyArchive>,
}

impl EngineBuilder {
    pub fn new(
        org: OrgContext,
        store: Arc<dyn SubmissionStore>,
        flows: Arc<dyn FlowSource>,
    ) -> Self {
        Self {
            org,
            store,
            flows,
            config: EngineConfig::default(),
            clock: None,
            loader: None,
            legacy: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses a preconfigured loader, e.g. one with custom type mappings.
    /// Its version gate takes precedence over the one in the config.
    pub fn loader(mut self, loader: FlowLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn legacy_archive(mut self, archive: LegacyArchive) -> Self {
        self.legacy = Some(archive);
        self
    }

    pub fn build(self) -> Engine {
        let config = self.config;
        let loader = self.loader.unwrap_or_else(|| {
            FlowLoader::builder()
                .version_gate(config.version_gate())
                .build()
        });
        let mut org = self.org;
        if let Some(locale) = &config.locale {
            org.locale = locale.clone();
        }

        Engine {
            org,
            store: self.store,
            flows: self.flows,
            loader,
            config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            legacy: self.legacy,
            cache: Mutex::new(AHashMap::new()),
        }
    }
}

impl Engine {
    pub fn builder(
        org: OrgContext,
        store: Arc<dyn SubmissionStore>,
        flows: Arc<dyn FlowSource>,
    ) -> EngineBuilder {
        EngineBuilder::new(org, store, flows)
    }

    pub fn org(&self) -> &OrgContext {
        &self.org
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a run on the newest revision of a flow.
    ///
    /// The run is persisted as `Active` on the entry node; nothing executes until
    /// [`step`](Self::step) or [`advance`](Self::advance) is called.
    pub fn start_run(&self, flow_uuid: &str, contact: ContactContext) -> Result<Run, EngineError> {
        self.start(flow_uuid, contact, None)
    }

    /// Executes the current node of an `Active` run.
    ///
    /// A run waiting on an async result past its deadline has the timeout applied
    /// instead.
    pub fn step(&self, run_uuid: Uuid) -> Result<Run, EngineError> {
        let _lease = self.store.acquire(run_uuid)?;
        let mut run = self.store.resume(run_uuid)?;
        let flow = self.pinned_flow(&run)?;
        let machine = self.machine(&flow);

        let outcome = if machine.is_overdue(&run) {
            machine.resume_async(&mut run, AsyncOutcome::TimedOut)
        } else {
            self.expect_status(&run, RunStatus::Active)?;
            machine.step(&mut run)
        };
        self.commit(&run, outcome)?;
        Ok(run)
    }

    /// Steps an `Active` run until it suspends, completes or is abandoned.
    ///
    /// A run that executes more than `max_steps_per_advance` nodes in one call is
    /// abandoned with [`EvaluationError::StepLimitExceeded`]. Calling this on a run
    /// that is already suspended returns it unchanged.
    pub fn advance(&self, run_uuid: Uuid) -> Result<Run, EngineError> {
        let _lease = self.store.acquire(run_uuid)?;
        let mut run = self.store.resume(run_uuid)?;
        if run.status == RunStatus::Completed {
            return Err(EngineError::RunFinished(run_uuid));
        }
        let flow = self.pinned_flow(&run)?;
        let machine = self.machine(&flow);
        let limit = self.config.max_steps_per_advance;

        let mut executed = 0;
        loop {
            let outcome = if machine.is_overdue(&run) {
                machine.resume_async(&mut run, AsyncOutcome::TimedOut)
            } else if run.status == RunStatus::Active {
                if executed >= limit {
                    Err(machine.abandon(&mut run, EvaluationError::StepLimitExceeded(limit)))
                } else {
                    machine.step(&mut run)
                }
            } else {
                break;
            };
            executed += 1;
            self.commit(&run, outcome)?;
        }
        Ok(run)
    }

    /// Answers the ruleset a run is waiting on.
    pub fn resume(&self, run_uuid: Uuid, input: &str) -> Result<Run, EngineError> {
        let _lease = self.store.acquire(run_uuid)?;
        let mut run = self.store.resume(run_uuid)?;
        self.expect_status(&run, RunStatus::WaitingForInput)?;
        let flow = self.pinned_flow(&run)?;

        let outcome = self.machine(&flow).resume(&mut run, input);
        self.commit(&run, outcome)?;
        Ok(run)
    }

    /// Hands the result of an async lookup to the run waiting on it.
    pub fn resume_async(&self, run_uuid: Uuid, outcome: AsyncOutcome) -> Result<Run, EngineError> {
        let _lease = self.store.acquire(run_uuid)?;
        let mut run = self.store.resume(run_uuid)?;
        self.expect_status(&run, RunStatus::WaitingForAsyncResult)?;
        let flow = self.pinned_flow(&run)?;

        let outcome = self.machine(&flow).resume_async(&mut run, outcome);
        self.commit(&run, outcome)?;
        Ok(run)
    }

    /// Abandons a run. Cancelling an abandoned run is a no-op.
    pub fn cancel(&self, run_uuid: Uuid) -> Result<Run, EngineError> {
        let _lease = self.store.acquire(run_uuid)?;
        let mut run = self.store.resume(run_uuid)?;
        match run.status {
            RunStatus::Completed => Err(EngineError::RunFinished(run_uuid)),
            RunStatus::Abandoned => Ok(run),
            _ => {
                let flow = self.pinned_flow(&run)?;
                self.machine(&flow).cancel(&mut run);
                self.store.persist(&run)?;
                info!(run_uuid = %run_uuid, node_id = ?run.current_node_id, "run cancelled");
                Ok(run)
            }
        }
    }

    /// Applies the timeout to every run whose async deadline has passed.
    ///
    /// Returns the runs that were timed out. Runs currently leased by another
    /// caller are skipped and picked up by the next poll.
    pub fn poll_timeouts(&self) -> Result<Vec<Uuid>, EngineError> {
        let now = self.clock.now();
        let overdue: Vec<Uuid> = self
            .store
            .runs()?
            .into_iter()
            .filter(|run| {
                run.status == RunStatus::WaitingForAsyncResult
                    && run
                        .pending_async
                        .as_ref()
                        .is_some_and(|wait| now >= wait.deadline)
            })
            .map(|run| run.run_uuid)
            .collect();

        let mut timed_out = Vec::new();
        for run_uuid in overdue {
            match self.resume_async(run_uuid, AsyncOutcome::TimedOut) {
                // An abandoned run still had its timeout applied.
                Ok(_) | Err(EngineError::Evaluation(_)) => {
                    warn!(run_uuid = %run_uuid, "async lookup timed out");
                    timed_out.push(run_uuid);
                }
                Err(EngineError::RunBusy(_)) => {
                    debug!(run_uuid = %run_uuid, "run busy, timeout deferred");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(timed_out)
    }

    /// Starts every child run queued by `StartOtherFlow` actions, in request order.
    ///
    /// Requests live in the store until their child has started, so a restart in
    /// between loses nothing. A child that already exists is not started twice.
    /// Each child is independent: one that cannot start does not stop the others.
    /// A request that failed only because the store did is kept for the next call.
    pub fn start_queued(&self) -> Result<Vec<Result<Run, EngineError>>, EngineError> {
        let requests = self.store.queued()?;
        let mut started = Vec::with_capacity(requests.len());
        for request in requests {
            let result = match self.store.resume(request.request_uuid) {
                Ok(existing) => Ok(existing),
                Err(StoreError::NotFound(_)) => self.start_child(&request),
                Err(e) => Err(e.into()),
            };
            match &result {
                Err(EngineError::Persistence(e)) => {
                    warn!(
                        request_uuid = %request.request_uuid,
                        error = %e,
                        "queued run kept for retry"
                    );
                }
                Err(e) => {
                    warn!(
                        request_uuid = %request.request_uuid,
                        flow_uuid = %request.flow_uuid,
                        error = %e,
                        "queued run dropped"
                    );
                    self.store.dequeue(request.request_uuid)?;
                }
                Ok(_) => self.store.dequeue(request.request_uuid)?,
            }
            started.push(result);
        }
        Ok(started)
    }

    /// Number of child runs waiting for `start_queued`.
    pub fn queued(&self) -> Result<usize, EngineError> {
        Ok(self.store.queued()?.len())
    }

    /// Reads a run without stepping it.
    pub fn run(&self, run_uuid: Uuid) -> Result<Run, EngineError> {
        Ok(self.store.resume(run_uuid)?)
    }

    pub fn finalize(&self, run_uuid: Uuid) -> Result<Submission, EngineError> {
        let submission = self.store.finalize(run_uuid)?;
        debug!(run_uuid = %run_uuid, "run finalized");
        Ok(submission)
    }

    pub fn list_pending(&self) -> Result<Vec<Submission>, EngineError> {
        Ok(self.store.list_pending()?)
    }

    /// Completed submissions from the legacy archive for one flow, if an archive is set.
    pub fn legacy_submissions(&self, flow_uuid: &str) -> Result<Vec<Submission>, EngineError> {
        match &self.legacy {
            Some(archive) => Ok(archive.completed(&self.org.uuid, flow_uuid)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn confirm_uploaded(&self, run_uuid: Uuid) -> Result<(), EngineError> {
        self.store.confirm_uploaded(run_uuid)?;
        info!(run_uuid = %run_uuid, "submission uploaded");
        Ok(())
    }

    pub fn discard(&self, run_uuid: Uuid) -> Result<(), EngineError> {
        let _lease = self.store.acquire(run_uuid)?;
        self.store.discard(run_uuid)?;
        info!(run_uuid = %run_uuid, "run discarded");
        Ok(())
    }

    /// Checks the newest revision of a flow against the version gate without
    /// loading the rest of it.
    pub fn is_supported(&self, flow_uuid: &str) -> Result<bool, EngineError> {
        let raw = self.latest_raw(flow_uuid)?;
        let version = probe_version(&raw)?;
        Ok(self.loader.gate().is_supported(&version))
    }

    pub fn summary(&self, flow_uuid: &str) -> Result<FlowSummary, EngineError> {
        let raw = self.latest_raw(flow_uuid)?;
        let spec_version = probe_version(&raw)?;
        let supported = self.loader.gate().is_supported(&spec_version);

        let mut completed_count = self.store.completed_count(&self.org.uuid, flow_uuid)?;
        if let Some(archive) = &self.legacy {
            completed_count += archive.completed_count(&self.org.uuid, flow_uuid)?;
        }

        let mut summary = FlowSummary {
            uuid: flow_uuid.to_string(),
            spec_version,
            supported,
            name: None,
            revision: None,
            question_count: None,
            completed_count,
        };
        if supported {
            let flow = self.latest_flow(flow_uuid)?;
            summary.name = Some(flow.name().to_string());
            summary.revision = Some(flow.revision());
            summary.question_count = Some(flow.question_count());
        }
        Ok(summary)
    }

    fn start(
        &self,
        flow_uuid: &str,
        contact: ContactContext,
        parent_run: Option<Uuid>,
    ) -> Result<Run, EngineError> {
        let flow = self.latest_flow(flow_uuid)?;
        let mut run = Run::new(
            &self.org.uuid,
            flow_uuid,
            flow.revision(),
            flow.entry(),
            contact,
            self.clock.now(),
        );
        run.parent_run = parent_run;
        self.store.persist(&run)?;
        info!(
            run_uuid = %run.run_uuid,
            flow_uuid,
            revision = run.flow_revision,
            parent_run = ?parent_run,
            "run started"
        );
        Ok(run)
    }

    /// Starts a queued child under the request's uuid.
    fn start_child(&self, request: &QueuedRun) -> Result<Run, EngineError> {
        let flow = self.latest_flow(&request.flow_uuid)?;
        let mut run = Run::new(
            &self.org.uuid,
            &request.flow_uuid,
            flow.revision(),
            flow.entry(),
            request.contact.clone(),
            self.clock.now(),
        );
        run.run_uuid = request.request_uuid;
        run.parent_run = Some(request.parent_run);
        self.store.persist(&run)?;
        info!(
            run_uuid = %run.run_uuid,
            flow_uuid = %request.flow_uuid,
            revision = run.flow_revision,
            parent_run = %request.parent_run,
            "child run started"
        );
        Ok(run)
    }

    /// Persists the run, then carries out what the transition asked for.
    ///
    /// Child run requests are recorded before the run that made them, so a run
    /// whose step is durable never loses its children. Evaluation errors are
    /// returned only after the abandoned run is durable. A failed auto-finalize
    /// leaves the completed run in place for a later [`finalize`](Self::finalize).
    fn commit(
        &self,
        run: &Run,
        outcome: Result<Transition, EvaluationError>,
    ) -> Result<(), EngineError> {
        if let Ok(transition) = &outcome {
            let now = self.clock.now();
            for (position, flow_uuid) in transition.started_flows.iter().enumerate() {
                let request = QueuedRun::new(run, flow_uuid, position, now);
                self.store.enqueue(&request)?;
                debug!(
                    parent_run = %run.run_uuid,
                    request_uuid = %request.request_uuid,
                    flow_uuid = %flow_uuid,
                    "child run queued"
                );
            }
        }

        if let Err(e) = self.store.persist(run) {
            warn!(run_uuid = %run.run_uuid, error = %e, "run could not be persisted");
            return Err(e.into());
        }

        if let Err(e) = outcome {
            warn!(run_uuid = %run.run_uuid, error = %e, "run abandoned");
            return Err(e.into());
        }
        debug!(
            run_uuid = %run.run_uuid,
            status = %run.status,
            node_id = ?run.current_node_id,
            "transition applied"
        );

        if run.status == RunStatus::Completed {
            info!(run_uuid = %run.run_uuid, steps = run.steps.len(), "run completed");
            if self.config.auto_finalize {
                if let Err(e) = self.store.finalize(run.run_uuid) {
                    warn!(run_uuid = %run.run_uuid, error = %e, "auto-finalize failed");
                }
            }
        }
        Ok(())
    }

    fn expect_status(&self, run: &Run, expected: RunStatus) -> Result<(), EngineError> {
        if run.status == RunStatus::Completed {
            return Err(EngineError::RunFinished(run.run_uuid));
        }
        if run.status != expected {
            return Err(EngineError::InvalidState {
                run_uuid: run.run_uuid,
                status: run.status,
                expected,
            });
        }
        Ok(())
    }

    fn machine<'e>(&'e self, flow: &'e Flow) -> Machine<'e> {
        Machine::new(flow, &self.org, self.clock.now(), self.config.async_timeout())
    }

    fn latest_raw(&self, flow_uuid: &str) -> Result<String, EngineError> {
        self.flows
            .latest(flow_uuid)
            .ok_or_else(|| EngineError::FlowUnavailable(flow_uuid.to_string()))
    }

    fn latest_flow(&self, flow_uuid: &str) -> Result<Arc<Flow>, EngineError> {
        let raw = self.latest_raw(flow_uuid)?;
        let flow = self.loader.load_str(&raw).inspect_err(|e| {
            warn!(flow_uuid, error = %e, "flow rejected");
        })?;
        let flow = Arc::new(flow);
        self.cache()
            .insert((flow_uuid.to_string(), flow.revision()), Arc::clone(&flow));
        Ok(flow)
    }

    /// The revision a run started on. Runs are never migrated to newer revisions.
    fn pinned_flow(&self, run: &Run) -> Result<Arc<Flow>, EngineError> {
        let key = (run.flow_uuid.clone(), run.flow_revision);
        if let Some(flow) = self.cache().get(&key) {
            return Ok(Arc::clone(flow));
        }

        let raw = self
            .flows
            .revision(&run.flow_uuid, run.flow_revision)
            .ok_or_else(|| EngineError::RevisionUnavailable {
                flow_uuid: run.flow_uuid.clone(),
                revision: run.flow_revision,
            })?;
        let flow = Arc::new(self.loader.load_str(&raw)?);
        self.cache().insert(key, Arc::clone(&flow));
        Ok(flow)
    }

    fn cache(&self) -> MutexGuard<'_, FlowCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
