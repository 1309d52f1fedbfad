use super::EvaluationContext;
use super::coercion::{as_date, as_number, compare, values_equal};
use crate::ast::{Expression, Reference, Value};
use crate::data::Locale;
use crate::error::EvaluationError;
use chrono::TimeDelta;
use std::cmp::Ordering;

// This macro generates a match arm for a binary operation.
macro_rules! eval_op {
    ($self:ident, $expr:ident, $l:ident, $r:ident, $op_str:expr, $op_fn:expr, number) => {
        $self.eval_arithmetic($expr, $l, $r, $op_str, $op_fn)
    };
    ($self:ident, $expr:ident, $l:ident, $r:ident, $op_str:expr, $op_fn:expr, ordering) => {
        $self.eval_ordering($l, $r, $op_fn)
    };
}

/// The core recursive engine for evaluating a single expression against a context.
pub(super) struct AstEngine<'c, 'a> {
    context: &'c EvaluationContext<'a>,
}

impl<'c, 'a> AstEngine<'c, 'a> {
    pub(super) fn new(context: &'c EvaluationContext<'a>) -> Self {
        Self { context }
    }

    pub(super) fn evaluate(&self, expr: &Expression) -> Result<Value, EvaluationError> {
        match expr {
            // --- Arithmetic Operations ---
            Expression::Sum(l, r) => eval_op!(self, expr, l, r, "+", |a, b| a + b, number),
            Expression::Subtract(l, r) => eval_op!(self, expr, l, r, "-", |a, b| a - b, number),
            Expression::Multiply(l, r) => eval_op!(self, expr, l, r, "*", |a, b| a * b, number),
            Expression::Divide(l, r) => eval_op!(self, expr, l, r, "/", |a, b| a / b, number),
            Expression::Negate(v) => match self.evaluate(v)? {
                Value::Missing => Ok(Value::Missing),
                value => as_number(&value, self.locale())
                    .map(|n| Value::Number(-n))
                    .ok_or_else(|| type_mismatch("-", "Number", value)),
            },

            // --- Text ---
            Expression::Concat(l, r) => {
                let left = self.evaluate(l)?;
                let right = self.evaluate(r)?;
                Ok(Value::Text(format!("{}{}", left, right)))
            }

            // --- Comparison Operations ---
            Expression::GreaterThan(l, r) => {
                eval_op!(self, expr, l, r, ">", |o| o == Ordering::Greater, ordering)
            }
            Expression::SmallerThan(l, r) => {
                eval_op!(self, expr, l, r, "<", |o| o == Ordering::Less, ordering)
            }
            Expression::GreaterThanOrEqual(l, r) => {
                eval_op!(self, expr, l, r, ">=", |o| o != Ordering::Less, ordering)
            }
            Expression::SmallerThanOrEqual(l, r) => {
                eval_op!(self, expr, l, r, "<=", |o| o != Ordering::Greater, ordering)
            }

            // --- Equality ---
            Expression::Equal(l, r) => {
                let left = self.evaluate(l)?;
                let right = self.evaluate(r)?;
                Ok(Value::Boolean(values_equal(&left, &right, self.locale())))
            }
            Expression::NotEqual(l, r) => {
                let left = self.evaluate(l)?;
                let right = self.evaluate(r)?;
                Ok(Value::Boolean(!values_equal(&left, &right, self.locale())))
            }

            // --- Logical Operations ---
            Expression::And(l, r) => {
                if !truthy("and", self.evaluate(l)?)? {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(truthy("and", self.evaluate(r)?)?))
            }
            Expression::Or(l, r) => {
                if truthy("or", self.evaluate(l)?)? {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(truthy("or", self.evaluate(r)?)?))
            }
            Expression::Not(v) => Ok(Value::Boolean(!truthy("not", self.evaluate(v)?)?)),

            // --- Leaves ---
            Expression::Literal(val) => Ok(val.clone()),
            Expression::Reference(reference) => Ok(self.resolve(reference)),
        }
    }

    fn locale(&self) -> &Locale {
        &self.context.org.locale
    }

    /// Unresolved references are `Missing`, never an error.
    fn resolve(&self, reference: &Reference) -> Value {
        let ctx = self.context;
        let found = match reference {
            Reference::Name(key) => ctx
                .fields
                .get(key)
                .cloned()
                .or_else(|| ctx.contact.lookup(key))
                .or_else(|| ctx.org.lookup(key)),
            Reference::Field(key) => ctx.fields.get(key).cloned(),
            Reference::Contact(key) => ctx.contact.lookup(key),
            Reference::Org(key) => ctx.org.lookup(key),
            Reference::Input => Some(ctx.input.clone()),
            Reference::Today => Some(Value::Date(ctx.today)),
        };
        found.unwrap_or(Value::Missing)
    }

    fn eval_arithmetic<F>(
        &self,
        expr: &Expression,
        l: &Expression,
        r: &Expression,
        op: &'static str,
        f: F,
    ) -> Result<Value, EvaluationError>
    where
        F: Fn(f64, f64) -> f64,
    {
        let left = self.evaluate(l)?;
        let right = self.evaluate(r)?;
        if left.is_missing() || right.is_missing() {
            return Ok(Value::Missing);
        }

        // Dates shift by whole days; two dates subtract to a day count.
        match (op, &left, &right) {
            ("+" | "-", Value::Date(date), other) | ("+", other, Value::Date(date)) => {
                if op == "-" && as_number(other, self.locale()).is_none() {
                    if let Some(other_date) = as_date(other, self.locale()) {
                        let days = date.signed_duration_since(other_date).num_days();
                        return Ok(Value::Number(days as f64));
                    }
                }
                let days = as_number(other, self.locale())
                    .ok_or_else(|| type_mismatch(op, "Number", other.clone()))?;
                let days = if op == "-" { -days } else { days };
                return TimeDelta::try_days(days.trunc() as i64)
                    .and_then(|delta| date.checked_add_signed(delta))
                    .map(Value::Date)
                    .ok_or_else(|| EvaluationError::DateOutOfRange(expr.to_string()));
            }
            _ => {}
        }

        let a = as_number(&left, self.locale())
            .ok_or_else(|| type_mismatch(op, "Number", left.clone()))?;
        let b = as_number(&right, self.locale())
            .ok_or_else(|| type_mismatch(op, "Number", right.clone()))?;
        if op == "/" && b == 0.0 {
            return Err(EvaluationError::DivisionByZero(expr.to_string()));
        }
        let result = f(a, b);
        if !result.is_finite() {
            return Err(EvaluationError::NonFiniteResult(expr.to_string()));
        }
        Ok(Value::Number(result))
    }

    fn eval_ordering<F>(&self, l: &Expression, r: &Expression, f: F) -> Result<Value, EvaluationError>
    where
        F: Fn(Ordering) -> bool,
    {
        let left = self.evaluate(l)?;
        let right = self.evaluate(r)?;
        // A failed coercion makes the comparison false rather than an error.
        let outcome = compare(&left, &right, self.locale()).map(f).unwrap_or(false);
        Ok(Value::Boolean(outcome))
    }
}

/// Missing counts as false in logical operators; other non-booleans are errors.
fn truthy(op: &str, value: Value) -> Result<bool, EvaluationError> {
    match value {
        Value::Boolean(b) => Ok(b),
        Value::Missing => Ok(false),
        other => Err(type_mismatch(op, "Boolean", other)),
    }
}

fn type_mismatch(op: &str, expected: &str, found: Value) -> EvaluationError {
    EvaluationError::TypeMismatch {
        operation: op.to_string(),
        expected: expected.to_string(),
        found,
    }
}
