use super::version::SpecVersion;
use crate::ast::Expression;
use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;

/// The complete, canonical definition of a flow, ready for validation.
/// This is the target structure for any custom flow format conversion.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    pub uuid: String,
    pub name: String,
    pub spec_version: SpecVersion,
    pub base_language: String,
    pub flow_type: FlowType,
    pub entry: String,
    pub revision: u32,
    pub contact_creation: ContactCreation,
    pub action_sets: Vec<ActionSet>,
    pub rule_sets: Vec<RuleSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    Survey,
    Voice,
    Message,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowType::Survey => write!(f, "survey"),
            FlowType::Voice => write!(f, "voice"),
            FlowType::Message => write!(f, "message"),
        }
    }
}

/// When the device should create the contact a run is collected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactCreation {
    /// A new contact per run.
    #[default]
    Run,
    /// The logged-in user is the contact.
    Login,
}

/// A non-branching node: performs its actions in order, then moves on.
#[derive(Debug, Clone)]
pub struct ActionSet {
    pub id: String,
    pub actions: Vec<Action>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Action {
    SendMessage {
        text: LocalizedText,
    },
    SaveToField {
        field: String,
        value: Expression,
    },
    /// Queues an independent run of another flow for the same contact.
    StartOtherFlow {
        flow_uuid: String,
        name: Option<String>,
    },
    SetLanguage {
        language: String,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SendMessage { .. } => "send_message",
            Action::SaveToField { .. } => "save_to_field",
            Action::StartOtherFlow { .. } => "start_other_flow",
            Action::SetLanguage { .. } => "set_language",
        }
    }
}

/// A branching node: tests an operand against ordered rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub id: String,
    pub label: Option<String>,
    pub ruleset_type: RulesetType,
    /// `None` means the most recent response.
    pub operand: Option<Expression>,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Number of catch-all rules; a validated waiting ruleset has exactly one.
    pub fn catch_all_count(&self) -> usize {
        self.rules
            .iter()
            .filter(|rule| matches!(rule.test, RuleTest::CatchAll))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesetType {
    WaitForMessage,
    WaitForNumber,
    WaitForDate,
    WaitForGroup,
    /// Evaluates its operand as soon as it is entered.
    Expression,
    /// Suspends until an external lookup returns or times out.
    Webhook {
        url: String,
    },
}

impl RulesetType {
    /// True for the rulesets that suspend for a response from the person filling in the flow.
    pub fn waits_for_input(&self) -> bool {
        matches!(
            self,
            RulesetType::WaitForMessage
                | RulesetType::WaitForNumber
                | RulesetType::WaitForDate
                | RulesetType::WaitForGroup
        )
    }

    /// Rulesets that must always pick a rule: a timed-out or failed lookup reaches
    /// its rules as Missing and still has to move on.
    pub fn requires_catch_all(&self) -> bool {
        self.waits_for_input() || matches!(self, RulesetType::Webhook { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RulesetType::WaitForMessage => "wait_message",
            RulesetType::WaitForNumber => "wait_number",
            RulesetType::WaitForDate => "wait_date",
            RulesetType::WaitForGroup => "wait_group",
            RulesetType::Expression => "expression",
            RulesetType::Webhook { .. } => "webhook",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub uuid: String,
    pub test: RuleTest,
    pub category: LocalizedText,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateComparison {
    Before,
    Equal,
    After,
}

/// The closed set of tests a rule can apply to an operand.
#[derive(Debug, Clone)]
pub enum RuleTest {
    CatchAll,
    Equals(LocalizedText),
    ContainsAny(LocalizedText),
    ContainsAll(LocalizedText),
    StartsWith(LocalizedText),
    /// Compiled case-insensitive.
    Regex(Regex),
    HasText,
    HasNumber,
    Number {
        comparison: Comparison,
        threshold: Expression,
    },
    NumberBetween {
        min: Expression,
        max: Expression,
    },
    HasDate,
    Date {
        comparison: DateComparison,
        threshold: Expression,
    },
    InGroup {
        group: String,
    },
    IsMissing,
}

/// Text declared in one or more languages, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedText(pub Vec<(String, String)>);

impl LocalizedText {
    /// Text with no language attached; it resolves for every language.
    pub fn plain(text: &str) -> Self {
        Self(vec![(String::new(), text.to_string())])
    }

    pub fn with(mut self, language: &str, text: &str) -> Self {
        self.0.push((language.to_string(), text.to_string()));
        self
    }

    pub fn get(&self, language: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(lang, _)| lang == language)
            .map(|(_, text)| text.as_str())
    }

    /// Picks the preferred language, then the base language, then the first declared one.
    pub fn resolve(&self, preferred: Option<&str>, base: &str) -> &str {
        preferred
            .and_then(|lang| self.get(lang))
            .or_else(|| self.get(base))
            .or_else(|| self.0.first().map(|(_, text)| text.as_str()))
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Accepts either a bare string or a language map, keeping the map's declaration order.
impl<'de> Deserialize<'de> for LocalizedText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LocalizedVisitor;

        impl<'de> Visitor<'de> for LocalizedVisitor {
            type Value = LocalizedText;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or a map of language code to text")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(LocalizedText::plain(v))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((language, text)) = map.next_entry::<String, String>()? {
                    entries.push((language, text));
                }
                Ok(LocalizedText(entries))
            }
        }

        deserializer.deserialize_any(LocalizedVisitor)
    }
}

/// Borrowed view of a node resolved through a flow's node table.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    ActionSet(&'a ActionSet),
    RuleSet(&'a RuleSet),
}

impl<'a> Node<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Node::ActionSet(set) => &set.id,
            Node::RuleSet(set) => &set.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::ActionSet(_) => "action_set",
            Node::RuleSet(set) => set.ruleset_type.name(),
        }
    }
}
