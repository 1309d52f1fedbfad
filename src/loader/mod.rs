use crate::error::{DefinitionError, LoadError};
use crate::flow::{Flow, IntoFlow, RawFlow, SpecVersion, VersionGate, probe_version};
use ahash::AHashMap;

mod validator;

use validator::validate;

/// Turns raw flow documents into validated, executable [`Flow`]s.
///
/// Loading happens in a fixed order: the declared spec version is probed and checked
/// against the [`VersionGate`] first, then the document is converted, then its
/// structure is validated. The loader is pure; it never logs.
#[derive(Debug, Clone, Default)]
pub struct FlowLoader {
    gate: VersionGate,
    type_mappings: AHashMap<String, String>,
}

pub struct FlowLoaderBuilder {
    gate: VersionGate,
    type_mappings: AHashMap<String, String>,
}

impl FlowLoaderBuilder {
    pub fn new() -> Self {
        Self {
            gate: VersionGate::default(),
            type_mappings: AHashMap::new(),
        }
    }

    pub fn version_gate(mut self, gate: VersionGate) -> Self {
        self.gate = gate;
        self
    }

    /// Maps a custom action, ruleset or rule test type name onto a built-in one,
    /// e.g. `with_type_mapping("ask_number", "wait_number")`.
    pub fn with_type_mapping(mut self, user_type_name: &str, builtin_type_name: &str) -> Self {
        self.type_mappings
            .insert(user_type_name.to_string(), builtin_type_name.to_string());
        self
    }

    pub fn build(self) -> FlowLoader {
        FlowLoader {
            gate: self.gate,
            type_mappings: self.type_mappings,
        }
    }
}

impl Default for FlowLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowLoader {
    pub fn builder() -> FlowLoaderBuilder {
        FlowLoaderBuilder::new()
    }

    pub fn gate(&self) -> VersionGate {
        self.gate
    }

    /// Loads a flow from its JSON export.
    ///
    /// # Returns
    ///
    /// * `Ok(Flow)`: The validated flow.
    /// * `Err(LoadError::UnsupportedVersion)`: The declared major version is outside the
    ///   gate. Nothing but the `version` field has been looked at.
    /// * `Err(LoadError::InvalidDefinition)`: The document does not parse, convert or validate.
    pub fn load_str(&self, raw: &str) -> Result<Flow, LoadError> {
        self.check_version(probe_version(raw)?)?;

        let mut raw_flow: RawFlow = serde_json::from_str(raw)
            .map_err(|e| DefinitionError::JsonParseError(e.to_string()))?;
        self.apply_type_mappings(&mut raw_flow);

        let definition = raw_flow.into_flow()?;
        Ok(validate(definition)?)
    }

    /// Loads a flow from any format that converts into a `FlowDefinition`.
    ///
    /// The version gate runs on the version the source declares, before it is
    /// converted or validated.
    pub fn load_flow(&self, source: impl IntoFlow) -> Result<Flow, LoadError> {
        self.check_version(source.spec_version()?)?;
        let definition = source.into_flow()?;
        Ok(validate(definition)?)
    }

    pub fn check_version(&self, version: SpecVersion) -> Result<(), LoadError> {
        if self.gate.is_supported(&version) {
            Ok(())
        } else {
            Err(LoadError::UnsupportedVersion {
                version,
                min: self.gate.min_major,
                max: self.gate.max_major,
            })
        }
    }

    fn apply_type_mappings(&self, raw_flow: &mut RawFlow) {
        if self.type_mappings.is_empty() {
            return;
        }
        let remap = |name: &mut String| {
            if let Some(builtin) = self.type_mappings.get(name.as_str()) {
                *name = builtin.clone();
            }
        };

        for action in raw_flow.action_sets.iter_mut().flat_map(|set| set.actions.iter_mut()) {
            remap(&mut action.action_type);
        }
        for rule_set in raw_flow.rule_sets.iter_mut() {
            remap(&mut rule_set.ruleset_type);
            for rule in rule_set.rules.iter_mut() {
                remap(&mut rule.test.test_type);
            }
        }
    }
}

/// Loads a flow with the default version gate.
pub fn load(raw: &str) -> Result<Flow, LoadError> {
    FlowLoader::default().load_str(raw)
}
