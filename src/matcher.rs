use crate::ast::{Expression, Value};
use crate::evaluator::coercion::{as_date, as_number, fold_text, parse_number, values_equal};
use crate::evaluator::{EvaluationContext, evaluate};
use crate::error::EvaluationError;
use crate::flow::{Comparison, DateComparison, LocalizedText, Rule, RuleSet, RuleTest};
use ahash::AHashSet;
use std::cmp::Ordering;

/// The rule selected for an operand, with its category in the run's language.
#[derive(Debug, Clone)]
pub struct RuleMatch<'r> {
    pub rule: &'r Rule,
    pub index: usize,
    pub category: String,
}

/// Picks the first rule of a ruleset whose test accepts the operand.
///
/// Thresholds are evaluated against the matcher's context, so `date.today` and field
/// references inside them behave exactly as they do in actions.
pub struct RuleMatcher<'c, 'a> {
    context: &'c EvaluationContext<'a>,
    language: Option<&'c str>,
    base_language: &'c str,
}

impl<'c, 'a> RuleMatcher<'c, 'a> {
    pub fn new(context: &'c EvaluationContext<'a>, language: Option<&'c str>, base_language: &'c str) -> Self {
        Self {
            context,
            language,
            base_language,
        }
    }

    /// Walks the rules in definition order; the first success wins.
    ///
    /// # Returns
    ///
    /// * `Ok(RuleMatch)`: The winning rule. Always the case for a validated waiting
    ///   ruleset, which carries a catch-all.
    /// * `Err(EvaluationError::NoMatchingRule)`: No rule matched.
    /// * `Err(EvaluationError)`: A threshold expression failed to evaluate.
    pub fn find_match<'r>(&self, rule_set: &'r RuleSet, operand: &Value) -> Result<RuleMatch<'r>, EvaluationError> {
        for (index, rule) in rule_set.rules.iter().enumerate() {
            if self.test(&rule.test, operand)? {
                return Ok(RuleMatch {
                    rule,
                    index,
                    category: rule
                        .category
                        .resolve(self.language, self.base_language)
                        .to_string(),
                });
            }
        }
        Err(EvaluationError::NoMatchingRule(rule_set.id.clone()))
    }

    /// Applies a single test. Coercion failures make the test fail; they are not errors.
    pub fn test(&self, test: &RuleTest, operand: &Value) -> Result<bool, EvaluationError> {
        match test {
            RuleTest::CatchAll => return Ok(true),
            RuleTest::IsMissing => return Ok(operand.is_missing()),
            _ if operand.is_missing() => return Ok(false),
            _ => {}
        }

        let locale = &self.context.org.locale;
        let text = operand.to_string();
        let outcome = match test {
            RuleTest::CatchAll | RuleTest::IsMissing => true,
            RuleTest::Equals(expected) => {
                values_equal(operand, &Value::Text(self.localized(expected).to_string()), locale)
            }
            RuleTest::ContainsAny(words) => {
                let found = words_of(&text);
                words_of(self.localized(words)).iter().any(|w| found.contains(w))
            }
            RuleTest::ContainsAll(words) => {
                let found = words_of(&text);
                let wanted = words_of(self.localized(words));
                !wanted.is_empty() && wanted.iter().all(|w| found.contains(w))
            }
            RuleTest::StartsWith(prefix) => {
                fold_text(&text).starts_with(&fold_text(self.localized(prefix)))
            }
            RuleTest::Regex(regex) => regex.is_match(&text),
            RuleTest::HasText => !text.trim().is_empty(),
            RuleTest::HasNumber => self.extract_number(operand).is_some(),
            RuleTest::Number {
                comparison,
                threshold,
            } => match (self.extract_number(operand), self.number(threshold)?) {
                (Some(value), Some(limit)) => compare_with(*comparison, value.partial_cmp(&limit)),
                _ => false,
            },
            RuleTest::NumberBetween { min, max } => {
                match (self.extract_number(operand), self.number(min)?, self.number(max)?) {
                    (Some(value), Some(low), Some(high)) => low <= value && value <= high,
                    _ => false,
                }
            }
            RuleTest::HasDate => as_date(operand, locale).is_some(),
            RuleTest::Date {
                comparison,
                threshold,
            } => {
                let limit = evaluate(threshold, self.context)?;
                match (as_date(operand, locale), as_date(&limit, locale)) {
                    (Some(value), Some(limit)) => match comparison {
                        DateComparison::Before => value < limit,
                        DateComparison::Equal => value == limit,
                        DateComparison::After => value > limit,
                    },
                    _ => false,
                }
            }
            RuleTest::InGroup { group } => {
                let wanted = fold_text(group);
                text.split(',').any(|member| fold_text(member) == wanted)
            }
        };
        Ok(outcome)
    }

    fn localized<'t>(&self, text: &'t LocalizedText) -> &'t str {
        text.resolve(self.language, self.base_language)
    }

    fn number(&self, threshold: &Expression) -> Result<Option<f64>, EvaluationError> {
        let value = evaluate(threshold, self.context)?;
        Ok(as_number(&value, &self.context.org.locale))
    }

    /// Reads the operand as a number, or failing that the first word that is one,
    /// so "I am 15" still answers a number question.
    fn extract_number(&self, operand: &Value) -> Option<f64> {
        let locale = &self.context.org.locale;
        as_number(operand, locale).or_else(|| match operand {
            Value::Text(text) => text
                .split_whitespace()
                .find_map(|word| parse_number(word, locale)),
            _ => None,
        })
    }
}

fn compare_with(comparison: Comparison, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match comparison {
        Comparison::Less => ordering == Ordering::Less,
        Comparison::LessOrEqual => ordering != Ordering::Greater,
        Comparison::Equal => ordering == Ordering::Equal,
        Comparison::GreaterOrEqual => ordering != Ordering::Less,
        Comparison::Greater => ordering == Ordering::Greater,
    }
}

fn words_of(text: &str) -> AHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}
