use crate::ast::Value;
use crate::data::ContactContext;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// About to execute the current node.
    Active,
    WaitingForInput,
    WaitingForAsyncResult,
    Completed,
    /// Cancelled by the caller, or stopped by an evaluation error.
    Abandoned,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Active => "active",
            RunStatus::WaitingForInput => "waiting for input",
            RunStatus::WaitingForAsyncResult => "waiting for an async result",
            RunStatus::Completed => "completed",
            RunStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepErrorKind {
    /// Fatal: the run was abandoned on this step.
    Evaluation,
    /// The async lookup did not answer before its deadline; the run went on with `Missing`.
    AsyncTimeout,
    /// The async lookup reported a failure; the run went on with `Missing`.
    AsyncFailure,
    Cancelled,
}

/// Error marker kept on a step so abandoned and resumed runs stay diagnosable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

/// One visit to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub node_id: String,
    pub node_kind: String,
    pub arrived_on: DateTime<Utc>,
    /// `None` while the run is suspended on this node.
    pub left_on: Option<DateTime<Utc>>,
    /// The raw response, exactly as received.
    pub input: Option<String>,
    /// The typed value the rules were tested against.
    pub value: Option<Value>,
    pub category: Option<String>,
    pub rule_uuid: Option<String>,
    /// Rendered message bodies, in action order.
    pub messages: Vec<String>,
    /// Flows queued by this step.
    pub started_flows: Vec<String>,
    pub error: Option<StepError>,
}

impl Step {
    pub fn arrive(node_id: &str, node_kind: &str, now: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_kind: node_kind.to_string(),
            arrived_on: now,
            left_on: None,
            input: None,
            value: None,
            category: None,
            rule_uuid: None,
            messages: Vec::new(),
            started_flows: Vec::new(),
            error: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.left_on.is_none()
    }
}

/// An outstanding async lookup on a webhook ruleset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncWait {
    pub node_id: String,
    pub url: String,
    pub requested_on: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// The result an external caller hands back for an async lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncOutcome {
    Success(Value),
    Failure(String),
    TimedOut,
}

/// A child run requested by a `StartOtherFlow` action, durable until it has started.
///
/// `request_uuid` is derived from the parent run and the position of the action that
/// asked for it, so recording the same request twice yields the same record, and the
/// child run started from it reuses the uuid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRun {
    pub request_uuid: Uuid,
    pub flow_uuid: String,
    pub contact: ContactContext,
    pub parent_run: Uuid,
    pub requested_on: DateTime<Utc>,
    /// Index of the parent step that queued the child.
    pub step_index: usize,
    /// Position of the flow among those queued by the same step.
    pub position: usize,
}

impl QueuedRun {
    pub fn new(parent: &Run, flow_uuid: &str, position: usize, now: DateTime<Utc>) -> Self {
        let step_index = parent.steps.len().saturating_sub(1);
        let name = format!("{}:{}", step_index, position);
        Self {
            request_uuid: Uuid::new_v5(&parent.run_uuid, name.as_bytes()),
            flow_uuid: flow_uuid.to_string(),
            contact: parent.contact.clone(),
            parent_run: parent.run_uuid,
            requested_on: now,
            step_index,
            position,
        }
    }
}

/// One execution of a flow for one contact, pinned to the revision it started on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_uuid: Uuid,
    pub org_uuid: String,
    pub flow_uuid: String,
    pub flow_revision: u32,
    /// `None` once the run has left the graph.
    pub current_node_id: Option<String>,
    pub status: RunStatus,
    /// Language chosen by a `SetLanguage` action, else the contact's.
    pub language: Option<String>,
    /// Keys are normalized field keys.
    pub field_values: AHashMap<String, Value>,
    pub steps: Vec<Step>,
    pub contact: ContactContext,
    pub pending_async: Option<AsyncWait>,
    /// Set on runs queued by another run's `StartOtherFlow` action.
    pub parent_run: Option<Uuid>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        org_uuid: &str,
        flow_uuid: &str,
        flow_revision: u32,
        entry: &str,
        contact: ContactContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_uuid: Uuid::new_v4(),
            org_uuid: org_uuid.to_string(),
            flow_uuid: flow_uuid.to_string(),
            flow_revision,
            current_node_id: Some(entry.to_string()),
            status: RunStatus::Active,
            language: contact.language.clone(),
            field_values: AHashMap::new(),
            steps: Vec::new(),
            contact,
            pending_async: None,
            parent_run: None,
            created_on: now,
            modified_on: now,
            completed_on: None,
        }
    }

    /// The typed value of the most recent response, `Missing` before the first one.
    pub fn last_response(&self) -> Value {
        self.steps
            .iter()
            .rev()
            .find_map(|step| step.value.clone())
            .unwrap_or(Value::Missing)
    }

    /// The step the run is currently suspended on, if any.
    pub fn open_step_mut(&mut self) -> Option<&mut Step> {
        let node_id = self.current_node_id.as_deref()?;
        self.steps
            .last_mut()
            .filter(|step| step.is_open() && step.node_id == node_id)
    }
}
