use crate::ast::Value;
use crate::engine::{Run, RunStatus, Step};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The frozen, upload-ready record of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub run_uuid: Uuid,
    pub org_uuid: String,
    pub flow_uuid: String,
    pub flow_revision: u32,
    pub contact_uuid: Option<String>,
    pub started_on: DateTime<Utc>,
    pub completed_on: DateTime<Utc>,
    pub steps: Vec<Step>,
    /// Ordered by key so the payload is stable.
    pub field_values: BTreeMap<String, Value>,
    /// Read from the legacy archive rather than produced by this engine.
    pub legacy: bool,
}

impl Submission {
    /// Freezes a completed run.
    pub fn from_run(run: &Run) -> Result<Self, StoreError> {
        let completed_on = match (run.status, run.completed_on) {
            (RunStatus::Completed, Some(completed_on)) => completed_on,
            (status, _) => {
                return Err(StoreError::NotCompleted {
                    run_uuid: run.run_uuid,
                    status,
                });
            }
        };

        Ok(Self {
            run_uuid: run.run_uuid,
            org_uuid: run.org_uuid.clone(),
            flow_uuid: run.flow_uuid.clone(),
            flow_revision: run.flow_revision,
            contact_uuid: run.contact.uuid.clone(),
            started_on: run.created_on,
            completed_on,
            steps: run.steps.clone(),
            field_values: run
                .field_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            legacy: false,
        })
    }

    /// Builds the body the upload layer posts to the server's run-creation endpoint.
    pub fn to_payload(&self) -> serde_json::Value {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .map(|step| {
                json!({
                    "node": step.node_id,
                    "arrived_on": step.arrived_on.to_rfc3339(),
                    "left_on": step.left_on.map(|t| t.to_rfc3339()),
                    "text": step.input,
                    "value": step.value.as_ref().map(Value::to_json),
                    "category": step.category,
                    "rule": step.rule_uuid,
                    "actions": step.messages,
                    "errors": step.error.as_ref().map(|e| e.message.clone()),
                })
            })
            .collect();
        let values: serde_json::Map<String, serde_json::Value> = self
            .field_values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        json!({
            "flow": self.flow_uuid,
            "revision": self.flow_revision,
            "contact": self.contact_uuid,
            "started": self.started_on.to_rfc3339(),
            "completed": self.completed_on.to_rfc3339(),
            "org": self.org_uuid,
            "steps": steps,
            "values": values,
        })
    }
}
