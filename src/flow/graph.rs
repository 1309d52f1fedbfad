use super::definition::{FlowDefinition, Node, RuleSet};
use super::version::SpecVersion;
use ahash::AHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeSlot {
    ActionSet(usize),
    RuleSet(usize),
}

/// A validated, immutable flow. Only the loader creates one.
///
/// Nodes are reached through an id table rather than references between nodes, so
/// flows that loop back on themselves need no special handling.
#[derive(Debug, Clone)]
pub struct Flow {
    definition: FlowDefinition,
    index: AHashMap<String, NodeSlot>,
}

impl Flow {
    /// Builds the node table. Returns the first id claimed by two nodes on conflict.
    pub(crate) fn index(definition: FlowDefinition) -> Result<Self, String> {
        let mut index = AHashMap::with_capacity(
            definition.action_sets.len() + definition.rule_sets.len(),
        );
        let action_ids = definition
            .action_sets
            .iter()
            .enumerate()
            .map(|(i, set)| (set.id.clone(), NodeSlot::ActionSet(i)));
        let rule_ids = definition
            .rule_sets
            .iter()
            .enumerate()
            .map(|(i, set)| (set.id.clone(), NodeSlot::RuleSet(i)));

        for (id, slot) in action_ids.chain(rule_ids) {
            if index.insert(id.clone(), slot).is_some() {
                return Err(id);
            }
        }
        Ok(Self { definition, index })
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn uuid(&self) -> &str {
        &self.definition.uuid
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn revision(&self) -> u32 {
        self.definition.revision
    }

    pub fn spec_version(&self) -> SpecVersion {
        self.definition.spec_version
    }

    pub fn base_language(&self) -> &str {
        &self.definition.base_language
    }

    pub fn entry(&self) -> &str {
        &self.definition.entry
    }

    pub fn node(&self, id: &str) -> Option<Node<'_>> {
        match self.index.get(id)? {
            NodeSlot::ActionSet(i) => self.definition.action_sets.get(*i).map(Node::ActionSet),
            NodeSlot::RuleSet(i) => self.definition.rule_sets.get(*i).map(Node::RuleSet),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of questions a respondent is asked, i.e. rulesets that wait for input.
    pub fn question_count(&self) -> usize {
        self.definition
            .rule_sets
            .iter()
            .filter(|set| set.ruleset_type.waits_for_input())
            .count()
    }

    pub fn rule_sets(&self) -> impl Iterator<Item = &RuleSet> {
        self.definition.rule_sets.iter()
    }
}
