//! Read-only access to submissions written by older releases.
//!
//! Older releases kept one JSON file per submission under
//! `<root>/<org_uuid>/<flow_uuid>/<name>.json`, in the same shape the upload
//! payload has today. Files without a `completed` timestamp were never
//! finished and are skipped, as are files that no longer parse. Nothing in this
//! module writes or deletes.

use crate::ast::Value;
use crate::engine::Step;
use crate::error::LegacyError;
use crate::store::Submission;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

#[derive(Deserialize)]
struct LegacyFile {
    run: Option<Uuid>,
    flow: String,
    #[serde(default = "default_revision")]
    revision: u32,
    contact: Option<String>,
    started: DateTime<Utc>,
    completed: Option<DateTime<Utc>>,
    #[serde(default)]
    steps: Vec<LegacyStep>,
    #[serde(default)]
    values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct LegacyStep {
    node: String,
    arrived_on: DateTime<Utc>,
    left_on: Option<DateTime<Utc>>,
    text: Option<String>,
    value: Option<serde_json::Value>,
    category: Option<String>,
    rule: Option<String>,
    #[serde(default)]
    actions: Vec<String>,
}

fn default_revision() -> u32 {
    1
}

/// A directory of legacy submission files.
#[derive(Debug, Clone)]
pub struct LegacyArchive {
    root: PathBuf,
}

impl LegacyArchive {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Completed legacy submissions for one flow, oldest completion first.
    ///
    /// A missing directory means there is nothing to read, not an error.
    pub fn completed(&self, org_uuid: &str, flow_uuid: &str) -> Result<Vec<Submission>, LegacyError> {
        let dir = self.root.join(org_uuid).join(flow_uuid);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| LegacyError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| LegacyError::Io {
                    path: dir.display().to_string(),
                    message: e.to_string(),
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut submissions = Vec::new();
        for path in paths {
            match read_submission(&path, org_uuid) {
                Ok(Some(submission)) => submissions.push(submission),
                Ok(None) => {}
                Err(LegacyError::Malformed { path, message }) => {
                    warn!(path = %path, error = %message, "malformed legacy submission skipped");
                }
                Err(e) => return Err(e),
            }
        }
        submissions.sort_by(|a, b| a.completed_on.cmp(&b.completed_on));
        Ok(submissions)
    }

    pub fn completed_count(&self, org_uuid: &str, flow_uuid: &str) -> Result<usize, LegacyError> {
        Ok(self.completed(org_uuid, flow_uuid)?.len())
    }
}

fn read_submission(path: &Path, org_uuid: &str) -> Result<Option<Submission>, LegacyError> {
    let content = fs::read_to_string(path).map_err(|e| LegacyError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let file: LegacyFile = serde_json::from_str(&content).map_err(|e| LegacyError::Malformed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let Some(completed_on) = file.completed else {
        return Ok(None);
    };

    // Old files carry no run id; derive a stable one from the file path.
    let run_uuid = file.run.unwrap_or_else(|| {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, path.to_string_lossy().as_bytes())
    });

    let steps = file
        .steps
        .into_iter()
        .map(|legacy| {
            let mut step = Step::arrive(&legacy.node, "legacy", legacy.arrived_on);
            step.left_on = legacy.left_on;
            step.input = legacy.text;
            step.value = legacy.value.as_ref().map(Value::from_json);
            step.category = legacy.category;
            step.rule_uuid = legacy.rule;
            step.messages = legacy.actions;
            step
        })
        .collect();
    let field_values: BTreeMap<String, Value> = file
        .values
        .iter()
        .map(|(key, value)| (key.clone(), Value::from_json(value)))
        .collect();

    Ok(Some(Submission {
        run_uuid,
        org_uuid: org_uuid.to_string(),
        flow_uuid: file.flow,
        flow_revision: file.revision,
        contact_uuid: file.contact,
        started_on: file.started,
        completed_on,
        steps,
        field_values,
        legacy: true,
    }))
}
