//! Common test utilities for building flows, engines and contexts.
use chousa::engine::QueuedRun;
use chousa::error::StoreError;
use chousa::prelude::*;
use chousa::store::RunLease;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A1 asks for an age, RS1 waits for a number.
///
/// Logic: `< 18` -> Minor, anything else -> Adult. Both end the flow.
#[allow(dead_code)]
pub const AGE_FLOW_JSON: &str = r#"{
    "version": "11.12",
    "base_language": "eng",
    "flow_type": "S",
    "entry": "a1",
    "metadata": {"uuid": "age-flow", "name": "Age check", "revision": 1},
    "action_sets": [
        {"uuid": "a1", "destination": "rs1", "actions": [
            {"type": "reply", "msg": {"eng": "How old are you?", "fra": "Quel age avez-vous ?"}}
        ]}
    ],
    "rule_sets": [
        {"uuid": "rs1", "label": "Age", "ruleset_type": "wait_number", "operand": "@step.value",
         "rules": [
            {"uuid": "r-minor", "test": {"type": "lt", "test": "18"}, "category": {"eng": "Minor", "fra": "Mineur"}},
            {"uuid": "r-adult", "test": {"type": "true"}, "category": {"eng": "Adult", "fra": "Majeur"}}
         ]}
    ]
}"#;

/// A registration survey: asks for a name and a district, saves both, greets the
/// contact, then starts the age flow as an independent child run.
#[allow(dead_code)]
pub const REGISTRATION_FLOW_JSON: &str = r#"{
    "version": 12,
    "base_language": "eng",
    "flow_type": "survey",
    "entry": "welcome",
    "metadata": {"uuid": "registration", "name": "Registration", "revision": 3},
    "action_sets": [
        {"uuid": "welcome", "destination": "ask_name", "actions": [
            {"type": "reply", "msg": {"eng": "Welcome to {org.name}. What is your name?"}}
        ]},
        {"uuid": "save_name", "destination": "ask_district", "actions": [
            {"type": "save", "field": "Full Name", "value": "@step.value"},
            {"type": "reply", "msg": {"eng": "Thanks {flow.full_name}. Which district?"}}
        ]},
        {"uuid": "save_district", "destination": null, "actions": [
            {"type": "save", "field": "District"},
            {"type": "save", "field": "Source", "value": "survey"},
            {"type": "flow", "flow": {"uuid": "age-flow", "name": "Age check"}},
            {"type": "reply", "msg": {"eng": "{flow.full_name} from {flow.district}, done."}}
        ]}
    ],
    "rule_sets": [
        {"uuid": "ask_name", "ruleset_type": "wait_message",
         "rules": [
            {"uuid": "n-has", "test": {"type": "not_empty"}, "category": {"eng": "Has Name"}, "destination": "save_name"},
            {"uuid": "n-other", "test": {"type": "true"}, "category": {"eng": "Other"}, "destination": "save_name"}
         ]},
        {"uuid": "ask_district", "ruleset_type": "wait_message",
         "rules": [
            {"uuid": "d-north", "test": {"type": "contains_any", "test": {"eng": "north northern"}}, "category": {"eng": "North"}, "destination": "save_district"},
            {"uuid": "d-nor", "test": {"type": "starts", "test": {"eng": "nor"}}, "category": {"eng": "Starts Nor"}, "destination": "save_district"},
            {"uuid": "d-other", "test": {"type": "true"}, "category": {"eng": "Other"}, "destination": "save_district"}
         ]}
    ]
}"#;

/// A webhook lookup with a catch-all, followed by nothing.
#[allow(dead_code)]
pub const LOOKUP_FLOW_JSON: &str = r#"{
    "version": "13.0.1",
    "base_language": "eng",
    "entry": "lookup",
    "metadata": {"uuid": "lookup-flow", "name": "Lookup", "revision": 1},
    "rule_sets": [
        {"uuid": "lookup", "ruleset_type": "webhook", "config": {"webhook": "https://example.org/check"},
         "rules": [
            {"uuid": "l-ok", "test": {"type": "equals", "test": {"eng": "ok"}}, "category": {"eng": "Success"}},
            {"uuid": "l-other", "test": {"type": "true"}, "category": {"eng": "Failure"}}
         ]}
    ]
}"#;

/// Two action sets pointing at each other.
#[allow(dead_code)]
pub const LOOPING_FLOW_JSON: &str = r#"{
    "version": 11,
    "entry": "ping",
    "metadata": {"uuid": "loop-flow", "name": "Loop", "revision": 1},
    "action_sets": [
        {"uuid": "ping", "destination": "pong", "actions": [{"type": "save", "field": "hits", "value": "@flow.hits + 1"}]},
        {"uuid": "pong", "destination": "ping", "actions": []}
    ]
}"#;

/// An expression ruleset with no catch-all, so an unmatched operand abandons the run.
#[allow(dead_code)]
pub const STRICT_EXPRESSION_FLOW_JSON: &str = r#"{
    "version": 11,
    "entry": "check",
    "metadata": {"uuid": "strict-flow", "name": "Strict", "revision": 1},
    "rule_sets": [
        {"uuid": "check", "ruleset_type": "expression", "operand": "@contact.age",
         "rules": [
            {"uuid": "c-adult", "test": {"type": "gte", "test": "18"}, "category": "Adult"}
         ]}
    ]
}"#;

/// Declares a version outside the default gate, on top of a document that is not a flow.
#[allow(dead_code)]
pub const FUTURE_VERSION_JSON: &str = r#"{
    "version": "20.0",
    "entry": 42,
    "action_sets": "this is not a list",
    "metadata": {"uuid": "future-flow"}
}"#;

/// A fixed instant so timestamps and `date.today` are reproducible.
#[allow(dead_code)]
pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn create_org() -> OrgContext {
    OrgContext::new("org-1", "Field Office")
}

#[allow(dead_code)]
pub fn create_contact() -> ContactContext {
    ContactContext::new(Some("contact-1".to_string()))
        .with_attribute("Name", "Ama")
        .with_attribute("Age", 34.0)
}

/// Every test flow, loaded into one source.
#[allow(dead_code)]
pub fn create_source() -> Arc<MemoryFlowSource> {
    let source = MemoryFlowSource::new();
    for raw in [
        AGE_FLOW_JSON,
        REGISTRATION_FLOW_JSON,
        LOOKUP_FLOW_JSON,
        LOOPING_FLOW_JSON,
        STRICT_EXPRESSION_FLOW_JSON,
        FUTURE_VERSION_JSON,
    ] {
        source.insert(raw).expect("test flow should carry a uuid");
    }
    Arc::new(source)
}

/// Everything a test needs to drive runs and inspect what was persisted.
#[allow(dead_code)]
pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub source: Arc<MemoryFlowSource>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
pub fn create_harness() -> Harness {
    create_harness_with(EngineConfig::default())
}

#[allow(dead_code)]
pub fn create_harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source = create_source();
    let clock = Arc::new(ManualClock::new(start_time()));
    let engine = Engine::builder(create_org(), store.clone(), source.clone())
        .config(config)
        .clock(clock.clone())
        .build();
    Harness {
        engine,
        store,
        source,
        clock,
    }
}

/// Wraps a `MemoryStore` and fails every run write while `failing` is set, and
/// every finalize while `failing_finalize` is set.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub failing: AtomicBool,
    pub failing_finalize: AtomicBool,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_finalize(&self, failing: bool) {
        self.failing_finalize.store(failing, Ordering::SeqCst);
    }
}

fn disk_full() -> StoreError {
    StoreError::Io {
        path: "flaky".to_string(),
        message: "disk full".to_string(),
    }
}

impl SubmissionStore for FlakyStore {
    fn acquire(&self, run_uuid: Uuid) -> std::result::Result<RunLease, StoreError> {
        self.inner.acquire(run_uuid)
    }

    fn persist(&self, run: &Run) -> std::result::Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.persist(run)
    }

    fn resume(&self, run_uuid: Uuid) -> std::result::Result<Run, StoreError> {
        self.inner.resume(run_uuid)
    }

    fn runs(&self) -> std::result::Result<Vec<Run>, StoreError> {
        self.inner.runs()
    }

    fn finalize(&self, run_uuid: Uuid) -> std::result::Result<Submission, StoreError> {
        if self.failing_finalize.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.finalize(run_uuid)
    }

    fn list_pending(&self) -> std::result::Result<Vec<Submission>, StoreError> {
        self.inner.list_pending()
    }

    fn confirm_uploaded(&self, run_uuid: Uuid) -> std::result::Result<(), StoreError> {
        self.inner.confirm_uploaded(run_uuid)
    }

    fn discard(&self, run_uuid: Uuid) -> std::result::Result<(), StoreError> {
        self.inner.discard(run_uuid)
    }

    fn enqueue(&self, request: &QueuedRun) -> std::result::Result<(), StoreError> {
        self.inner.enqueue(request)
    }

    fn queued(&self) -> std::result::Result<Vec<QueuedRun>, StoreError> {
        self.inner.queued()
    }

    fn dequeue(&self, request_uuid: Uuid) -> std::result::Result<(), StoreError> {
        self.inner.dequeue(request_uuid)
    }
}
