use crate::error::DefinitionError;
use crate::flow::{Flow, FlowDefinition, FlowType};

/// Structural checks on a converted definition. Any defect rejects the whole flow.
pub(super) fn validate(definition: FlowDefinition) -> Result<Flow, DefinitionError> {
    if definition.flow_type != FlowType::Survey {
        return Err(DefinitionError::UnsupportedFlowType(
            definition.flow_type.to_string(),
        ));
    }

    let flow = Flow::index(definition).map_err(DefinitionError::DuplicateNodeId)?;
    if !flow.contains(flow.entry()) {
        return Err(DefinitionError::EntryNotFound(flow.entry().to_string()));
    }

    let definition = flow.definition();
    let check = |node_id: &str, destination: &Option<String>| match destination {
        Some(dest) if !flow.contains(dest) => Err(DefinitionError::DanglingDestination {
            node_id: node_id.to_string(),
            destination: dest.clone(),
        }),
        _ => Ok(()),
    };

    for action_set in &definition.action_sets {
        check(&action_set.id, &action_set.destination)?;
    }

    for rule_set in &definition.rule_sets {
        for rule in &rule_set.rules {
            check(&rule_set.id, &rule.destination)?;
        }
        if rule_set.ruleset_type.requires_catch_all() {
            match rule_set.catch_all_count() {
                0 => return Err(DefinitionError::MissingCatchAll(rule_set.id.clone())),
                1 => {}
                count => {
                    return Err(DefinitionError::MultipleCatchAll {
                        ruleset_id: rule_set.id.clone(),
                        count,
                    });
                }
            }
        }
    }

    Ok(flow)
}
