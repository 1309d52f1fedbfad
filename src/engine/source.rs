use crate::error::DefinitionError;
use ahash::AHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Where the engine gets raw flow documents from; the sync and cache layer implements it.
pub trait FlowSource: Send + Sync {
    /// The newest revision available for a flow.
    fn latest(&self, flow_uuid: &str) -> Option<String>;

    /// A specific revision, used to keep resumed runs on the revision they started on.
    fn revision(&self, flow_uuid: &str, revision: u32) -> Option<String>;
}

/// Keeps every revision it has been given in memory.
#[derive(Debug, Default)]
pub struct MemoryFlowSource {
    flows: RwLock<AHashMap<String, BTreeMap<u32, String>>>,
}

impl MemoryFlowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a raw document, reading its uuid and revision from the document itself.
    pub fn insert(&self, raw: &str) -> Result<(String, u32), DefinitionError> {
        #[derive(Deserialize)]
        struct Metadata {
            uuid: Option<String>,
            revision: Option<u32>,
        }
        #[derive(Deserialize)]
        struct Identity {
            uuid: Option<String>,
            revision: Option<u32>,
            metadata: Option<Metadata>,
        }

        let identity: Identity =
            serde_json::from_str(raw).map_err(|e| DefinitionError::JsonParseError(e.to_string()))?;
        let metadata = identity.metadata.as_ref();
        let uuid = metadata
            .and_then(|m| m.uuid.clone())
            .or(identity.uuid)
            .ok_or_else(|| DefinitionError::MissingField("metadata.uuid".to_string()))?;
        let revision = metadata
            .and_then(|m| m.revision)
            .or(identity.revision)
            .unwrap_or(1);

        self.insert_revision(&uuid, revision, raw);
        Ok((uuid, revision))
    }

    pub fn insert_revision(&self, flow_uuid: &str, revision: u32, raw: &str) {
        let mut flows = match self.flows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flows
            .entry(flow_uuid.to_string())
            .or_default()
            .insert(revision, raw.to_string());
    }
}

impl FlowSource for MemoryFlowSource {
    fn latest(&self, flow_uuid: &str) -> Option<String> {
        let flows = self.flows.read().ok()?;
        flows
            .get(flow_uuid)
            .and_then(|revisions| revisions.values().next_back().cloned())
    }

    fn revision(&self, flow_uuid: &str, revision: u32) -> Option<String> {
        let flows = self.flows.read().ok()?;
        flows
            .get(flow_uuid)
            .and_then(|revisions| revisions.get(&revision).cloned())
    }
}
