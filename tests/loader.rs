//! Loader tests
//!
//! Check the load order (version gate, conversion, validation) and every
//! structural rule a flow has to satisfy.
mod common;
use chousa::flow::RawFlow;
use chousa::prelude::*;
use common::*;

/// A minimal waiting flow with the given rules on `rs`.
fn flow_with_rules(rules: &str) -> String {
    format!(
        r#"{{
            "version": 11, "entry": "rs", "metadata": {{"uuid": "f"}},
            "rule_sets": [{{"uuid": "rs", "ruleset_type": "wait_message", "rules": [{}]}}]
        }}"#,
        rules
    )
}

#[cfg(test)]
mod loading_tests {
    use super::*;

    #[test]
    fn test_loads_age_flow() {
        let flow = load(AGE_FLOW_JSON).expect("age flow should load");
        assert_eq!(flow.uuid(), "age-flow");
        assert_eq!(flow.name(), "Age check");
        assert_eq!(flow.revision(), 1);
        assert_eq!(flow.spec_version(), SpecVersion::new(11, 12, 0));
        assert_eq!(flow.base_language(), "eng");
        assert_eq!(flow.entry(), "a1");
        assert_eq!(flow.question_count(), 1);
        assert!(flow.contains("rs1"));
        assert!(!flow.contains("nowhere"));
    }

    #[test]
    fn test_every_bundled_flow_loads() {
        for raw in [
            AGE_FLOW_JSON,
            REGISTRATION_FLOW_JSON,
            LOOKUP_FLOW_JSON,
            LOOPING_FLOW_JSON,
            STRICT_EXPRESSION_FLOW_JSON,
        ] {
            assert!(load(raw).is_ok(), "failed to load {}", raw);
        }
    }

    #[test]
    fn test_version_gate_runs_before_anything_else() {
        match load(FUTURE_VERSION_JSON) {
            Err(LoadError::UnsupportedVersion { version, min, max }) => {
                assert_eq!(version.major, 20);
                assert_eq!((min, max), (11, 13));
            }
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_gate() {
        let loader = FlowLoader::builder()
            .version_gate(VersionGate::new(12, 20))
            .build();
        assert!(matches!(
            loader.load_str(AGE_FLOW_JSON),
            Err(LoadError::UnsupportedVersion { .. })
        ));
        // Past the gate, the broken document is rejected on its own merits.
        assert!(matches!(
            loader.load_str(FUTURE_VERSION_JSON),
            Err(LoadError::InvalidDefinition(DefinitionError::JsonParseError(_)))
        ));
    }

    #[test]
    fn test_type_mappings() {
        let raw = AGE_FLOW_JSON.replace("wait_number", "ask_number");
        assert!(matches!(
            load(&raw),
            Err(LoadError::InvalidDefinition(DefinitionError::InvalidType {
                kind: "ruleset",
                ..
            }))
        ));

        let loader = FlowLoader::builder()
            .with_type_mapping("ask_number", "wait_number")
            .build();
        let flow = loader.load_str(&raw).unwrap();
        assert_eq!(flow.question_count(), 1);
    }

    #[test]
    fn test_load_flow_from_definition() {
        let definition = load(AGE_FLOW_JSON).unwrap().definition().clone();
        let flow = FlowLoader::default().load_flow(definition.clone()).unwrap();
        assert_eq!(flow.uuid(), definition.uuid);
        assert_eq!(flow.definition().rule_sets.len(), definition.rule_sets.len());

        let mut future = definition;
        future.spec_version = SpecVersion::new(9, 0, 0);
        assert!(matches!(
            FlowLoader::default().load_flow(future),
            Err(LoadError::UnsupportedVersion { .. })
        ));
    }

    /// Declares a version but cannot be converted.
    struct Unconvertible(SpecVersion);

    impl IntoFlow for Unconvertible {
        fn spec_version(&self) -> std::result::Result<SpecVersion, DefinitionError> {
            Ok(self.0)
        }

        fn into_flow(self) -> std::result::Result<FlowDefinition, DefinitionError> {
            Err(DefinitionError::MissingField("entry".to_string()))
        }
    }

    #[test]
    fn test_load_flow_gates_before_converting() {
        let loader = FlowLoader::default();
        assert!(matches!(
            loader.load_flow(Unconvertible(SpecVersion::new(20, 0, 0))),
            Err(LoadError::UnsupportedVersion { version, .. }) if version.major == 20
        ));
        assert_eq!(
            loader.load_flow(Unconvertible(SpecVersion::new(11, 0, 0))).unwrap_err(),
            LoadError::InvalidDefinition(DefinitionError::MissingField("entry".to_string()))
        );

        let broken = LOOPING_FLOW_JSON.replace("@flow.hits + 1", "@flow.hits +");
        let mut raw: RawFlow = serde_json::from_str(&broken).unwrap();
        raw.version = Some(serde_json::json!("20.1"));
        assert!(matches!(
            loader.load_flow(raw),
            Err(LoadError::UnsupportedVersion { .. })
        ));
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn definition_error(raw: &str) -> DefinitionError {
        match load(raw) {
            Err(LoadError::InvalidDefinition(e)) => e,
            other => panic!("expected a definition error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_entry() {
        let raw = AGE_FLOW_JSON.replace("\"entry\": \"a1\"", "\"entry\": \"start\"");
        assert_eq!(
            definition_error(&raw),
            DefinitionError::EntryNotFound("start".to_string())
        );
    }

    #[test]
    fn test_dangling_destination() {
        let raw = AGE_FLOW_JSON.replace("\"destination\": \"rs1\"", "\"destination\": \"rs9\"");
        assert_eq!(
            definition_error(&raw),
            DefinitionError::DanglingDestination {
                node_id: "a1".to_string(),
                destination: "rs9".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_node_ids() {
        let raw = AGE_FLOW_JSON.replace("\"uuid\": \"rs1\"", "\"uuid\": \"a1\"");
        assert_eq!(
            definition_error(&raw),
            DefinitionError::DuplicateNodeId("a1".to_string())
        );
    }

    #[test]
    fn test_waiting_rulesets_need_exactly_one_catch_all() {
        let none = flow_with_rules(r#"{"uuid": "x", "test": {"type": "not_empty"}}"#);
        assert_eq!(
            definition_error(&none),
            DefinitionError::MissingCatchAll("rs".to_string())
        );

        let two = flow_with_rules(
            r#"{"uuid": "x", "test": {"type": "true"}}, {"uuid": "y", "test": {"type": "true"}}"#,
        );
        assert_eq!(
            definition_error(&two),
            DefinitionError::MultipleCatchAll {
                ruleset_id: "rs".to_string(),
                count: 2,
            }
        );

        let one = flow_with_rules(r#"{"uuid": "x", "test": {"type": "true"}}"#);
        assert!(load(&one).is_ok());
    }

    #[test]
    fn test_lookups_need_a_catch_all() {
        let raw = LOOKUP_FLOW_JSON.replace(
            r#"{"type": "true"}, "category": {"eng": "Failure"}"#,
            r#"{"type": "not_empty"}, "category": {"eng": "Failure"}"#,
        );
        assert_ne!(raw, LOOKUP_FLOW_JSON);
        assert_eq!(
            definition_error(&raw),
            DefinitionError::MissingCatchAll("lookup".to_string())
        );
    }

    #[test]
    fn test_only_surveys_execute() {
        let raw = AGE_FLOW_JSON.replace("\"flow_type\": \"S\"", "\"flow_type\": \"M\"");
        assert_eq!(
            definition_error(&raw),
            DefinitionError::UnsupportedFlowType("message".to_string())
        );
    }

    #[test]
    fn test_expressions_must_parse() {
        let raw = LOOPING_FLOW_JSON.replace("@flow.hits + 1", "@flow.hits +");
        assert!(matches!(
            definition_error(&raw),
            DefinitionError::InvalidExpression { node_id, .. } if node_id == "ping"
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            definition_error("{\"version\": 11, "),
            DefinitionError::JsonParseError(_)
        ));
        assert_eq!(
            definition_error(r#"{"entry": "a"}"#),
            DefinitionError::MissingField("version".to_string())
        );
    }
}
