use super::definition::*;
use super::version::SpecVersion;
use crate::ast::{Expression, Reference, Value, parse_expression};
use crate::data::{DateStyle, Locale, normalize_key};
use crate::evaluator::coercion::parse_date;
use crate::error::DefinitionError;
use regex::RegexBuilder;
use serde::Deserialize;

/// A trait for flow formats that can be converted into a canonical `FlowDefinition`.
///
/// The bundled [`RawFlow`] reads the JSON flow export format. Other formats implement
/// this trait on their own structs and hand them to [`crate::loader::FlowLoader::load_flow`].
///
/// # Example
///
/// ```rust,no_run
/// use chousa::prelude::*;
/// use chousa::error::DefinitionError;
///
/// struct OneQuestion {
///     prompt: String,
/// }
///
/// impl IntoFlow for OneQuestion {
///     fn spec_version(&self) -> std::result::Result<SpecVersion, DefinitionError> {
///         Ok(SpecVersion::new(11, 0, 0))
///     }
///
///     fn into_flow(self) -> std::result::Result<FlowDefinition, DefinitionError> {
///         Ok(FlowDefinition {
///             uuid: "one-question".to_string(),
///             name: "One question".to_string(),
///             spec_version: SpecVersion::new(11, 0, 0),
///             base_language: "eng".to_string(),
///             flow_type: FlowType::Survey,
///             entry: "ask".to_string(),
///             revision: 1,
///             contact_creation: ContactCreation::Run,
///             action_sets: vec![ActionSet {
///                 id: "ask".to_string(),
///                 actions: vec![Action::SendMessage {
///                     text: LocalizedText::plain(&self.prompt),
///                 }],
///                 destination: None,
///             }],
///             rule_sets: vec![],
///         })
///     }
/// }
/// ```
pub trait IntoFlow {
    /// The spec version the source declares, read without converting anything else.
    fn spec_version(&self) -> Result<SpecVersion, DefinitionError>;

    /// Consumes the object and converts it into a canonical flow definition.
    fn into_flow(self) -> Result<FlowDefinition, DefinitionError>;
}

impl IntoFlow for FlowDefinition {
    fn spec_version(&self) -> Result<SpecVersion, DefinitionError> {
        Ok(self.spec_version)
    }

    fn into_flow(self) -> Result<FlowDefinition, DefinitionError> {
        Ok(self)
    }
}

/// The JSON flow export format, as delivered by the sync layer.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFlow {
    #[serde(alias = "spec_version")]
    pub version: Option<serde_json::Value>,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub revision: Option<u32>,
    pub base_language: Option<String>,
    pub flow_type: Option<String>,
    pub entry: Option<String>,
    #[serde(default)]
    pub action_sets: Vec<RawActionSet>,
    #[serde(default)]
    pub rule_sets: Vec<RawRuleSet>,
    pub metadata: Option<RawMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetadata {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub revision: Option<u32>,
    pub contact_creation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawActionSet {
    pub uuid: String,
    pub destination: Option<String>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub msg: Option<LocalizedText>,
    pub field: Option<String>,
    pub value: Option<String>,
    pub flow: Option<RawFlowReference>,
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFlowReference {
    pub uuid: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRuleSet {
    pub uuid: String,
    pub label: Option<String>,
    pub ruleset_type: String,
    pub operand: Option<String>,
    #[serde(default)]
    pub rules: Vec<RawRule>,
    pub webhook: Option<String>,
    pub config: Option<RawRuleSetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRuleSetConfig {
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRule {
    pub uuid: String,
    pub test: RawTest,
    pub category: Option<LocalizedText>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTest {
    #[serde(rename = "type")]
    pub test_type: String,
    pub test: Option<RawArgument>,
    pub min: Option<RawArgument>,
    pub max: Option<RawArgument>,
}

/// A rule test argument: a bare number, a group reference or (localized) text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawArgument {
    Number(f64),
    Group { name: String, uuid: Option<String> },
    Text(LocalizedText),
}

impl IntoFlow for RawFlow {
    fn spec_version(&self) -> Result<SpecVersion, DefinitionError> {
        let version = self
            .version
            .as_ref()
            .ok_or_else(|| DefinitionError::MissingField("version".to_string()))?;
        SpecVersion::from_json(version)
    }

    fn into_flow(self) -> Result<FlowDefinition, DefinitionError> {
        let spec_version = IntoFlow::spec_version(&self)?;
        let metadata = self.metadata.as_ref();

        let uuid = metadata
            .and_then(|m| m.uuid.clone())
            .or(self.uuid)
            .ok_or_else(|| DefinitionError::MissingField("metadata.uuid".to_string()))?;
        let name = metadata
            .and_then(|m| m.name.clone())
            .or(self.name)
            .unwrap_or_default();
        let revision = metadata.and_then(|m| m.revision).or(self.revision).unwrap_or(1);
        let contact_creation = match metadata.and_then(|m| m.contact_creation.as_deref()) {
            Some("login") => ContactCreation::Login,
            _ => ContactCreation::Run,
        };
        let entry = self
            .entry
            .ok_or_else(|| DefinitionError::MissingField("entry".to_string()))?;
        let base_language = self.base_language.unwrap_or_else(|| "base".to_string());
        let flow_type = convert_flow_type(self.flow_type.as_deref())?;

        let action_sets = self
            .action_sets
            .into_iter()
            .map(convert_action_set)
            .collect::<Result<Vec<_>, _>>()?;
        let rule_sets = self
            .rule_sets
            .into_iter()
            .map(|raw| convert_rule_set(raw, &base_language))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FlowDefinition {
            uuid,
            name,
            spec_version,
            base_language,
            flow_type,
            entry,
            revision,
            contact_creation,
            action_sets,
            rule_sets,
        })
    }
}

fn convert_flow_type(raw: Option<&str>) -> Result<FlowType, DefinitionError> {
    match raw.map(str::to_lowercase).as_deref() {
        None | Some("s") | Some("survey") | Some("surveyor") => Ok(FlowType::Survey),
        Some("v") | Some("voice") => Ok(FlowType::Voice),
        Some("m") | Some("f") | Some("message") | Some("flow") => Ok(FlowType::Message),
        Some(other) => Err(DefinitionError::UnsupportedFlowType(other.to_string())),
    }
}

fn convert_action_set(raw: RawActionSet) -> Result<ActionSet, DefinitionError> {
    let actions = raw
        .actions
        .into_iter()
        .map(|action| convert_action(&raw.uuid, action))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ActionSet {
        id: raw.uuid,
        actions,
        destination: raw.destination,
    })
}

fn convert_action(node_id: &str, raw: RawAction) -> Result<Action, DefinitionError> {
    let missing = |field: &str| DefinitionError::InvalidNode {
        node_id: node_id.to_string(),
        message: format!("'{}' action is missing '{}'", raw.action_type, field),
    };

    match raw.action_type.as_str() {
        "reply" | "send" | "msg" => Ok(Action::SendMessage {
            text: raw.msg.clone().ok_or_else(|| missing("msg"))?,
        }),
        "save" => {
            let field = raw.field.as_deref().ok_or_else(|| missing("field"))?;
            let field = normalize_key(field);
            if field.is_empty() {
                return Err(missing("field"));
            }
            let value = field_value(node_id, raw.value.as_deref().unwrap_or("@step.value"))?;
            Ok(Action::SaveToField { field, value })
        }
        "flow" => {
            let flow = raw.flow.clone().ok_or_else(|| missing("flow"))?;
            Ok(Action::StartOtherFlow {
                flow_uuid: flow.uuid,
                name: flow.name,
            })
        }
        "lang" => Ok(Action::SetLanguage {
            language: raw.lang.clone().ok_or_else(|| missing("lang"))?,
        }),
        other => Err(DefinitionError::InvalidType {
            node_id: node_id.to_string(),
            kind: "action",
            type_name: other.to_string(),
        }),
    }
}

/// Values starting with `@` are expressions; anything else is stored as literal text.
fn field_value(node_id: &str, raw: &str) -> Result<Expression, DefinitionError> {
    if raw.trim_start().starts_with('@') {
        parse(node_id, raw)
    } else {
        Ok(Expression::Literal(Value::Text(raw.to_string())))
    }
}

/// Date literals stay text so the matcher reads them with the run's locale; anything
/// else is an expression. `2024-06-01` would otherwise parse as a subtraction.
fn threshold_value(node_id: &str, raw: &str) -> Result<Expression, DefinitionError> {
    let literal = raw.trim();
    let looks_like_date = [DateStyle::DayFirst, DateStyle::MonthFirst, DateStyle::YearFirst]
        .into_iter()
        .any(|date_style| {
            let locale = Locale {
                date_style,
                ..Locale::default()
            };
            parse_date(literal, &locale).is_some()
        });
    if !literal.starts_with('@') && looks_like_date {
        return Ok(Expression::Literal(Value::Text(literal.to_string())));
    }
    parse(node_id, raw)
}

fn parse(node_id: &str, text: &str) -> Result<Expression, DefinitionError> {
    parse_expression(text).map_err(|source| DefinitionError::InvalidExpression {
        node_id: node_id.to_string(),
        source,
    })
}

fn convert_rule_set(raw: RawRuleSet, base_language: &str) -> Result<RuleSet, DefinitionError> {
    let ruleset_type = match raw.ruleset_type.as_str() {
        "wait_message" => RulesetType::WaitForMessage,
        "wait_number" | "wait_digits" => RulesetType::WaitForNumber,
        "wait_date" => RulesetType::WaitForDate,
        "wait_group" => RulesetType::WaitForGroup,
        "expression" | "flow_field" | "contact_field" | "form_field" | "group" => {
            RulesetType::Expression
        }
        "webhook" | "resthook" => {
            let url = raw
                .config
                .as_ref()
                .and_then(|c| c.webhook.clone())
                .or_else(|| raw.webhook.clone())
                .ok_or_else(|| DefinitionError::InvalidNode {
                    node_id: raw.uuid.clone(),
                    message: "webhook ruleset has no url".to_string(),
                })?;
            RulesetType::Webhook { url }
        }
        other => {
            return Err(DefinitionError::InvalidType {
                node_id: raw.uuid,
                kind: "ruleset",
                type_name: other.to_string(),
            });
        }
    };

    let operand = match raw.operand.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) => match parse(&raw.uuid, text)? {
            Expression::Reference(Reference::Input) => None,
            expr => Some(expr),
        },
    };

    let rules = raw
        .rules
        .into_iter()
        .map(|rule| convert_rule(&raw.uuid, rule, base_language))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuleSet {
        id: raw.uuid,
        label: raw.label,
        ruleset_type,
        operand,
        rules,
    })
}

fn convert_rule(node_id: &str, raw: RawRule, base_language: &str) -> Result<Rule, DefinitionError> {
    Ok(Rule {
        test: convert_test(node_id, raw.test, base_language)?,
        uuid: raw.uuid,
        category: raw.category.unwrap_or_default(),
        destination: raw.destination,
    })
}

fn convert_test(node_id: &str, raw: RawTest, base_language: &str) -> Result<RuleTest, DefinitionError> {
    let argument = |arg: Option<RawArgument>, name: &str| {
        arg.ok_or_else(|| DefinitionError::InvalidNode {
            node_id: node_id.to_string(),
            message: format!("'{}' test is missing '{}'", raw.test_type, name),
        })
    };
    let localized = |arg: RawArgument| match arg {
        RawArgument::Text(text) => text,
        RawArgument::Number(n) => LocalizedText::plain(&Value::Number(n).to_string()),
        RawArgument::Group { name, .. } => LocalizedText::plain(&name),
    };
    let threshold = |arg: RawArgument| match arg {
        RawArgument::Number(n) => Ok(Expression::Literal(Value::Number(n))),
        other => threshold_value(node_id, localized(other).resolve(None, base_language)),
    };
    let number = |comparison| -> Result<RuleTest, DefinitionError> {
        Ok(RuleTest::Number {
            comparison,
            threshold: threshold(argument(raw.test.clone(), "test")?)?,
        })
    };
    let date = |comparison| -> Result<RuleTest, DefinitionError> {
        Ok(RuleTest::Date {
            comparison,
            threshold: threshold(argument(raw.test.clone(), "test")?)?,
        })
    };

    let test = match raw.test_type.as_str() {
        "true" => RuleTest::CatchAll,
        "equals" | "eq_text" => RuleTest::Equals(localized(argument(raw.test.clone(), "test")?)),
        "contains" => RuleTest::ContainsAll(localized(argument(raw.test.clone(), "test")?)),
        "contains_any" => RuleTest::ContainsAny(localized(argument(raw.test.clone(), "test")?)),
        "starts" => RuleTest::StartsWith(localized(argument(raw.test.clone(), "test")?)),
        "regex" => {
            let text = localized(argument(raw.test.clone(), "test")?);
            let pattern = text.resolve(None, base_language);
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| DefinitionError::InvalidRegex {
                    node_id: node_id.to_string(),
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
            RuleTest::Regex(regex)
        }
        "not_empty" => RuleTest::HasText,
        "number" => RuleTest::HasNumber,
        "lt" => number(Comparison::Less)?,
        "lte" => number(Comparison::LessOrEqual)?,
        "eq" => number(Comparison::Equal)?,
        "gte" => number(Comparison::GreaterOrEqual)?,
        "gt" => number(Comparison::Greater)?,
        "between" => RuleTest::NumberBetween {
            min: threshold(argument(raw.min.clone(), "min")?)?,
            max: threshold(argument(raw.max.clone(), "max")?)?,
        },
        "date" => RuleTest::HasDate,
        "date_before" => date(DateComparison::Before)?,
        "date_equal" => date(DateComparison::Equal)?,
        "date_after" => date(DateComparison::After)?,
        "in_group" => {
            let group = match argument(raw.test.clone(), "test")? {
                RawArgument::Group { name, .. } => name,
                other => localized(other).resolve(None, base_language).to_string(),
            };
            RuleTest::InGroup { group }
        }
        "is_missing" | "timeout" => RuleTest::IsMissing,
        other => {
            return Err(DefinitionError::InvalidType {
                node_id: node_id.to_string(),
                kind: "rule test",
                type_name: other.to_string(),
            });
        }
    };
    Ok(test)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawFlow {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_metadata_and_defaults() {
        let flow = raw(r#"{
            "version": "11.12", "entry": "a1", "flow_type": "S",
            "metadata": {"uuid": "f-1", "name": "Intake", "revision": 4, "contact_creation": "login"},
            "action_sets": [{"uuid": "a1", "actions": [{"type": "reply", "msg": {"eng": "Hi"}}]}]
        }"#)
        .into_flow()
        .unwrap();

        assert_eq!(flow.uuid, "f-1");
        assert_eq!(flow.revision, 4);
        assert_eq!(flow.spec_version, SpecVersion::new(11, 12, 0));
        assert_eq!(flow.contact_creation, ContactCreation::Login);
        assert_eq!(flow.base_language, "base");
        assert_eq!(flow.flow_type, FlowType::Survey);
    }

    #[test]
    fn test_rules_and_operands() {
        let flow = raw(r#"{
            "version": 11, "uuid": "f-2", "entry": "r1",
            "rule_sets": [{
                "uuid": "r1", "ruleset_type": "wait_number", "operand": "@step.value",
                "rules": [
                    {"uuid": "u1", "test": {"type": "between", "min": "1", "max": 10}, "category": {"eng": "Low"}},
                    {"uuid": "u2", "test": {"type": "in_group", "test": {"name": "Nurses", "uuid": "g"}}},
                    {"uuid": "u3", "test": {"type": "true"}, "category": "Other"}
                ]
            }]
        }"#)
        .into_flow()
        .unwrap();

        let rule_set = &flow.rule_sets[0];
        assert!(rule_set.operand.is_none());
        assert_eq!(rule_set.ruleset_type, RulesetType::WaitForNumber);
        assert!(matches!(rule_set.rules[0].test, RuleTest::NumberBetween { .. }));
        assert!(matches!(&rule_set.rules[1].test, RuleTest::InGroup { group } if group == "Nurses"));
        assert_eq!(rule_set.catch_all_count(), 1);
    }

    #[test]
    fn test_date_thresholds_stay_literal() {
        let flow = raw(r#"{
            "version": 11, "uuid": "f-3", "entry": "r1",
            "rule_sets": [{
                "uuid": "r1", "ruleset_type": "wait_date",
                "rules": [
                    {"uuid": "d1", "test": {"type": "date_before", "test": "2024-06-01"}},
                    {"uuid": "d2", "test": {"type": "date_after", "test": "15/07/2024"}},
                    {"uuid": "d3", "test": {"type": "date_equal", "test": "@date.today + 7"}},
                    {"uuid": "d4", "test": {"type": "true"}}
                ]
            }]
        }"#)
        .into_flow()
        .unwrap();

        let rules = &flow.rule_sets[0].rules;
        let threshold = |i: usize| match &rules[i].test {
            RuleTest::Date { threshold, .. } => threshold.clone(),
            other => panic!("unexpected test {:?}", other),
        };
        assert_eq!(threshold(0), Expression::Literal(Value::Text("2024-06-01".to_string())));
        assert_eq!(threshold(1), Expression::Literal(Value::Text("15/07/2024".to_string())));
        assert!(matches!(threshold(2), Expression::Sum(_, _)));
    }

    #[test]
    fn test_conversion_errors() {
        let bad_action = raw(r#"{"version": 11, "uuid": "f", "entry": "a",
            "action_sets": [{"uuid": "a", "actions": [{"type": "email"}]}]}"#);
        assert!(matches!(
            bad_action.into_flow(),
            Err(DefinitionError::InvalidType { kind: "action", .. })
        ));

        let bad_threshold = raw(r#"{"version": 11, "uuid": "f", "entry": "r",
            "rule_sets": [{"uuid": "r", "ruleset_type": "wait_number",
                "rules": [{"uuid": "x", "test": {"type": "lt", "test": "18 +"}}]}]}"#);
        assert!(matches!(
            bad_threshold.into_flow(),
            Err(DefinitionError::InvalidExpression { .. })
        ));

        let bad_regex = raw(r#"{"version": 11, "uuid": "f", "entry": "r",
            "rule_sets": [{"uuid": "r", "ruleset_type": "wait_message",
                "rules": [{"uuid": "x", "test": {"type": "regex", "test": {"eng": "(open"}}}]}]}"#);
        assert!(matches!(
            bad_regex.into_flow(),
            Err(DefinitionError::InvalidRegex { .. })
        ));
    }
}
