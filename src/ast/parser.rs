use super::{Expression, Reference, Value};
use crate::error::ExpressionError;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while},
    character::complete::{anychar, char, digit1, none_of, satisfy},
    combinator::{all_consuming, cut, map, map_opt, opt, recognize, value, verify},
    error::{context, VerboseError, VerboseErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

type ParseResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;
type Builder = fn(Box<Expression>, Box<Expression>) -> Expression;

/// Parses an expression such as `flow.age + 1 >= 18 and contact.district = "North"`.
///
/// A leading `@` before any term is accepted and ignored, so legacy operands like
/// `@step.value` or `@(flow.age + 1)` parse to the same tree as their bare forms.
pub fn parse_expression(text: &str) -> Result<Expression, ExpressionError> {
    if text.chars().all(is_blank) {
        return Err(error(text, 0, "expression is empty"));
    }
    match all_consuming(terminated(or_expr, blank))(text) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_error(text, e)),
        Err(nom::Err::Incomplete(_)) => Err(error(text, text.len(), "unexpected end of expression")),
    }
}

fn error(text: &str, offset: usize, message: &str) -> ExpressionError {
    ExpressionError {
        expression: text.to_string(),
        offset,
        message: message.to_string(),
    }
}

/// Maps nom's error stack onto the innermost offset and the nearest labelled context.
fn convert_error(text: &str, e: VerboseError<&str>) -> ExpressionError {
    let offset = e
        .errors
        .first()
        .map(|(rest, _)| text.len() - rest.len())
        .unwrap_or(0);
    let message = e
        .errors
        .iter()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(label) => Some(format!("expected {}", label)),
            _ => None,
        })
        .or_else(|| {
            e.errors.first().map(|(rest, kind)| match kind {
                VerboseErrorKind::Char(c) => format!("expected '{}'", c),
                _ if rest.is_empty() => "unexpected end of expression".to_string(),
                _ => "unexpected input".to_string(),
            })
        })
        .unwrap_or_else(|| "invalid expression".to_string());
    error(text, offset, &message)
}

fn is_blank(c: char) -> bool {
    c.is_whitespace() || c == '@'
}

fn blank(input: &str) -> ParseResult<'_, &str> {
    take_while(is_blank)(input)
}

fn word(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

fn keyword<'a>(name: &'static str) -> impl FnMut(&'a str) -> ParseResult<'a, &'a str> {
    verify(preceded(blank, word), move |w: &str| w.eq_ignore_ascii_case(name))
}

fn is_reserved(word: &str) -> bool {
    ["and", "or", "not", "true", "false"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

/// Folds `operand (operator operand)*` to the left. Once an operator is read the
/// right operand is required.
fn left_assoc<'a>(
    input: &'a str,
    operand: fn(&'a str) -> ParseResult<'a, Expression>,
    operator: fn(&'a str) -> ParseResult<'a, Builder>,
) -> ParseResult<'a, Expression> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(operator, cut(operand)))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |left, (build, right)| build(Box::new(left), Box::new(right)));
    Ok((input, expr))
}

fn or_expr(input: &str) -> ParseResult<'_, Expression> {
    left_assoc(input, and_expr, |i| value(Expression::Or as Builder, keyword("or"))(i))
}

fn and_expr(input: &str) -> ParseResult<'_, Expression> {
    left_assoc(input, not_expr, |i| value(Expression::And as Builder, keyword("and"))(i))
}

fn not_expr(input: &str) -> ParseResult<'_, Expression> {
    alt((
        map(preceded(keyword("not"), cut(not_expr)), |inner| {
            Expression::Not(Box::new(inner))
        }),
        comparison,
    ))(input)
}

fn comparison_operator(input: &str) -> ParseResult<'_, Builder> {
    preceded(
        blank,
        alt((
            value(Expression::Equal as Builder, tag("==")),
            value(Expression::NotEqual as Builder, tag("!=")),
            value(Expression::NotEqual as Builder, tag("<>")),
            value(Expression::SmallerThanOrEqual as Builder, tag("<=")),
            value(Expression::GreaterThanOrEqual as Builder, tag(">=")),
            value(Expression::Equal as Builder, tag("=")),
            value(Expression::SmallerThan as Builder, tag("<")),
            value(Expression::GreaterThan as Builder, tag(">")),
        )),
    )(input)
}

/// Comparisons do not chain: `a < b < c` is rejected.
fn comparison(input: &str) -> ParseResult<'_, Expression> {
    let (input, left) = concat_expr(input)?;
    let (input, right) = opt(pair(comparison_operator, cut(concat_expr)))(input)?;
    let expr = match right {
        Some((build, right)) => build(Box::new(left), Box::new(right)),
        None => left,
    };
    Ok((input, expr))
}

fn concat_expr(input: &str) -> ParseResult<'_, Expression> {
    left_assoc(input, additive, |i| {
        value(Expression::Concat as Builder, preceded(blank, char('&')))(i)
    })
}

fn additive(input: &str) -> ParseResult<'_, Expression> {
    left_assoc(input, multiplicative, |i| {
        preceded(
            blank,
            alt((
                value(Expression::Sum as Builder, char('+')),
                value(Expression::Subtract as Builder, char('-')),
            )),
        )(i)
    })
}

fn multiplicative(input: &str) -> ParseResult<'_, Expression> {
    left_assoc(input, unary, |i| {
        preceded(
            blank,
            alt((
                value(Expression::Multiply as Builder, char('*')),
                value(Expression::Divide as Builder, char('/')),
            )),
        )(i)
    })
}

fn unary(input: &str) -> ParseResult<'_, Expression> {
    alt((
        map(preceded(preceded(blank, char('-')), cut(unary)), |inner| {
            Expression::Negate(Box::new(inner))
        }),
        primary,
    ))(input)
}

fn primary(input: &str) -> ParseResult<'_, Expression> {
    preceded(
        blank,
        context(
            "a value, a reference or '('",
            alt((
                map(number, |n| Expression::Literal(Value::Number(n))),
                map(string_literal, |s| Expression::Literal(Value::Text(s))),
                boolean,
                map(reference, Expression::Reference),
                delimited(
                    char('('),
                    cut(or_expr),
                    cut(context("')'", preceded(blank, char(')')))),
                ),
            )),
        ),
    )(input)
}

/// Literals too large for a finite `f64` are rejected.
fn number(input: &str) -> ParseResult<'_, f64> {
    map_opt(
        recognize(pair(digit1, take_while(|c: char| c.is_ascii_digit() || c == '.'))),
        |literal: &str| literal.parse::<f64>().ok().filter(|n| n.is_finite()),
    )(input)
}

fn escaped_char(input: &str) -> ParseResult<'_, char> {
    alt((value('\n', char('n')), value('\t', char('t')), anychar))(input)
}

fn string_literal(input: &str) -> ParseResult<'_, String> {
    alt((
        delimited(
            char('"'),
            map(opt(escaped_transform(none_of("\"\\"), '\\', escaped_char)), Option::unwrap_or_default),
            cut(context("closing '\"'", char('"'))),
        ),
        delimited(
            char('\''),
            map(opt(escaped_transform(none_of("'\\"), '\\', escaped_char)), Option::unwrap_or_default),
            cut(context("closing \"'\"", char('\''))),
        ),
    ))(input)
}

fn boolean(input: &str) -> ParseResult<'_, Expression> {
    alt((
        value(Expression::Literal(Value::Boolean(true)), keyword("true")),
        value(Expression::Literal(Value::Boolean(false)), keyword("false")),
    ))(input)
}

fn reference(input: &str) -> ParseResult<'_, Reference> {
    map_opt(verify(word, |w: &str| !is_reserved(w)), reference_for)(input)
}

/// Turns a dotted identifier into a scoped reference. Keys are case-normalized.
fn reference_for(path: &str) -> Option<Reference> {
    let path = path.to_lowercase();
    if path.is_empty() || path.ends_with('.') || path.starts_with('.') || path.contains("..") {
        return None;
    }
    let reference = match path.as_str() {
        "input" | "step.value" => Reference::Input,
        "today" | "date.today" => Reference::Today,
        _ => match path.split_once('.') {
            Some(("flow", key)) => Reference::Field(key.to_string()),
            Some(("contact", key)) => Reference::Contact(key.to_string()),
            Some(("org", key)) => Reference::Org(key.to_string()),
            _ => Reference::Name(path.clone()),
        },
    };
    Some(reference)
}
