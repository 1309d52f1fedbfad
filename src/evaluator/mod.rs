use crate::ast::{Expression, Value};
use crate::data::{ContactContext, OrgContext};
use crate::error::EvaluationError;
use ahash::AHashMap;
use chrono::NaiveDate;

pub mod coercion;
mod engine;
mod template;

use engine::AstEngine;

/// Everything an expression may read while a step runs.
///
/// The context is borrowed, never mutated: evaluating the same expression against
/// the same context always yields the same value. `today` is fixed by the caller
/// instead of read from the system clock for the same reason.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// The run's field values, keyed by normalized field key.
    pub fields: &'a AHashMap<String, Value>,
    pub contact: &'a ContactContext,
    pub org: &'a OrgContext,
    /// The response currently being processed, `Missing` outside of a ruleset.
    pub input: &'a Value,
    pub today: NaiveDate,
}

/// Evaluates an expression to a typed value.
///
/// # Returns
///
/// * `Ok(Value)`: The result. Unresolved references produce `Value::Missing`.
/// * `Err(EvaluationError)`: On a type mismatch (e.g. `"abc" * 2`), a division by
///   zero or date arithmetic that leaves the calendar range.
pub fn evaluate(expression: &Expression, context: &EvaluationContext<'_>) -> Result<Value, EvaluationError> {
    AstEngine::new(context).evaluate(expression)
}

/// Renders a message template, interpolating `{expression}` spans.
pub fn render(template: &str, context: &EvaluationContext<'_>) -> Result<String, EvaluationError> {
    template::render(template, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_expression;

    struct Fixture {
        fields: AHashMap<String, Value>,
        contact: ContactContext,
        org: OrgContext,
        input: Value,
    }

    impl Fixture {
        fn new() -> Self {
            let mut fields = AHashMap::new();
            fields.insert("age".to_string(), Value::Number(15.0));
            fields.insert("district".to_string(), Value::from("Field"));
            Self {
                fields,
                contact: ContactContext::new(Some("c-1".to_string()))
                    .with_attribute("district", "Contact")
                    .with_attribute("name", "Ama"),
                org: OrgContext::new("org-1", "Clinic").with_constant("name", "Org Constant"),
                input: Value::from("42"),
            }
        }

        fn context(&self) -> EvaluationContext<'_> {
            EvaluationContext {
                fields: &self.fields,
                contact: &self.contact,
                org: &self.org,
                input: &self.input,
                today: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            }
        }

        fn eval(&self, text: &str) -> Result<Value, EvaluationError> {
            evaluate(&parse_expression(text).unwrap(), &self.context())
        }
    }

    #[test]
    fn test_resolution_order_and_scopes() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("district").unwrap(), Value::from("Field"));
        assert_eq!(fx.eval("contact.district").unwrap(), Value::from("Contact"));
        assert_eq!(fx.eval("name").unwrap(), Value::from("Ama"));
        assert_eq!(fx.eval("org.name").unwrap(), Value::from("Org Constant"));
        assert_eq!(fx.eval("flow.name").unwrap(), Value::Missing);
        assert_eq!(fx.eval("nowhere").unwrap(), Value::Missing);
    }

    #[test]
    fn test_arithmetic_and_dates() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("flow.age + input").unwrap(), Value::Number(57.0));
        assert_eq!(
            fx.eval("date.today + 30").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap())
        );
        assert_eq!(fx.eval("date.today - \"2024-02-01\"").unwrap(), Value::Number(29.0));
        assert_eq!(fx.eval("flow.missing + 1").unwrap(), Value::Missing);
        assert!(matches!(
            fx.eval("flow.age / 0"),
            Err(EvaluationError::DivisionByZero(_))
        ));
        assert!(matches!(
            fx.eval("\"abc\" * 2"),
            Err(EvaluationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_overflowing_arithmetic_is_an_error() {
        let mut fx = Fixture::new();
        fx.fields.insert("big".to_string(), Value::Number(f64::MAX));
        assert!(matches!(
            fx.eval("flow.big * 10"),
            Err(EvaluationError::NonFiniteResult(_))
        ));
        assert!(matches!(
            fx.eval("flow.big + flow.big - flow.big"),
            Err(EvaluationError::NonFiniteResult(_))
        ));
        assert_eq!(fx.eval("flow.big - flow.big").unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_logic_and_comparisons() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("flow.age < 18 and input = 42").unwrap(), Value::Boolean(true));
        assert_eq!(fx.eval("flow.nothing or false").unwrap(), Value::Boolean(false));
        assert_eq!(fx.eval("district = \"FIELD\"").unwrap(), Value::Boolean(true));
        assert_eq!(fx.eval("district > 3").unwrap(), Value::Boolean(false));
        assert!(fx.eval("not flow.age").is_err());
    }

    #[test]
    fn test_render_templates() {
        let fx = Fixture::new();
        let ctx = fx.context();
        assert_eq!(
            render("Hi {contact.name}, you are {flow.age}.", &ctx).unwrap(),
            "Hi Ama, you are 15."
        );
        assert_eq!(render("Nothing: [{flow.unknown}]", &ctx).unwrap(), "Nothing: []");
        assert_eq!(render("Open { brace", &ctx).unwrap(), "Open { brace");
        assert_eq!(render("Bad {1 +} span", &ctx).unwrap(), "Bad {1 +} span");
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let fx = Fixture::new();
        let expr = parse_expression("flow.age * 2 & \" \" & contact.name").unwrap();
        let first = evaluate(&expr, &fx.context()).unwrap();
        for _ in 0..10 {
            assert_eq!(evaluate(&expr, &fx.context()).unwrap(), first);
        }
    }
}
