use super::{Reference, Value};
use std::fmt;

/// The Abstract Syntax Tree of an operand, field value or rule threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    // Arithmetic
    Sum(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Negate(Box<Expression>),

    // Text
    Concat(Box<Expression>, Box<Expression>),

    // Logical
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),

    // Comparison
    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    SmallerThan(Box<Expression>, Box<Expression>),
    SmallerThanOrEqual(Box<Expression>, Box<Expression>),

    // Leaf nodes
    Literal(Value),
    Reference(Reference),
}

impl Expression {
    /// Gets the precedence level for an expression type. Higher numbers bind more tightly.
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            Expression::Or(_, _) => 1,
            Expression::And(_, _) => 2,
            Expression::Not(_) => 3,
            Expression::Equal(_, _) | Expression::NotEqual(_, _) => 4,
            Expression::GreaterThan(_, _)
            | Expression::GreaterThanOrEqual(_, _)
            | Expression::SmallerThan(_, _)
            | Expression::SmallerThanOrEqual(_, _) => 4,
            Expression::Concat(_, _) => 5,
            Expression::Sum(_, _) | Expression::Subtract(_, _) => 6,
            Expression::Multiply(_, _) | Expression::Divide(_, _) => 7,
            Expression::Negate(_) => 8,
            Expression::Literal(_) | Expression::Reference(_) => 9,
        }
    }

    /// Recursively formats the expression, adding parentheses only when necessary.
    fn fmt_with_precedence(&self, f: &mut fmt::Formatter<'_>, parent_precedence: u8) -> fmt::Result {
        let current_precedence = self.precedence();
        let needs_parens = current_precedence < parent_precedence;

        if needs_parens {
            write!(f, "(")?;
        }

        match self {
            Expression::Or(l, r) => self.fmt_binary(f, "or", l, r, current_precedence)?,
            Expression::And(l, r) => self.fmt_binary(f, "and", l, r, current_precedence)?,
            Expression::Equal(l, r) => self.fmt_binary(f, "=", l, r, current_precedence)?,
            Expression::NotEqual(l, r) => self.fmt_binary(f, "!=", l, r, current_precedence)?,
            Expression::GreaterThan(l, r) => self.fmt_binary(f, ">", l, r, current_precedence)?,
            Expression::GreaterThanOrEqual(l, r) => {
                self.fmt_binary(f, ">=", l, r, current_precedence)?
            }
            Expression::SmallerThan(l, r) => self.fmt_binary(f, "<", l, r, current_precedence)?,
            Expression::SmallerThanOrEqual(l, r) => {
                self.fmt_binary(f, "<=", l, r, current_precedence)?
            }
            Expression::Concat(l, r) => self.fmt_binary(f, "&", l, r, current_precedence)?,
            Expression::Sum(l, r) => self.fmt_binary(f, "+", l, r, current_precedence)?,
            Expression::Subtract(l, r) => self.fmt_binary(f, "-", l, r, current_precedence)?,
            Expression::Multiply(l, r) => self.fmt_binary(f, "*", l, r, current_precedence)?,
            Expression::Divide(l, r) => self.fmt_binary(f, "/", l, r, current_precedence)?,

            Expression::Not(v) => {
                write!(f, "not ")?;
                v.fmt_with_precedence(f, current_precedence)?;
            }
            Expression::Negate(v) => {
                write!(f, "-")?;
                v.fmt_with_precedence(f, current_precedence)?;
            }

            Expression::Literal(Value::Text(s)) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))?
            }
            Expression::Literal(Value::Missing) => write!(f, "missing")?,
            Expression::Literal(v) => write!(f, "{}", v)?,
            Expression::Reference(r) => write!(f, "{}", r)?,
        }

        if needs_parens {
            write!(f, ")")?;
        }
        Ok(())
    }

    fn fmt_binary(
        &self,
        f: &mut fmt::Formatter<'_>,
        op: &str,
        l: &Expression,
        r: &Expression,
        current_precedence: u8,
    ) -> fmt::Result {
        l.fmt_with_precedence(f, current_precedence)?;
        write!(f, " {} ", op)?;
        // Right operands of the same precedence are parenthesized so `a - (b - c)` survives.
        r.fmt_with_precedence(f, current_precedence + 1)?;
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with_precedence(f, 0)
    }
}
