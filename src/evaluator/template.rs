use super::EvaluationContext;
use super::engine::AstEngine;
use crate::ast::parse_expression;
use crate::error::EvaluationError;
use regex::Regex;
use std::sync::LazyLock;

/// A `{...}` span with no nested braces.
static SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("template span pattern compiles"));

/// Interpolates `{expression}` spans inside a message body.
///
/// Spans that do not parse, and braces without a partner, are copied through verbatim.
/// Missing values render as empty text. Evaluation failures inside a span that did
/// parse are errors, the same as anywhere else in a step.
pub(super) fn render(template: &str, context: &EvaluationContext<'_>) -> Result<String, EvaluationError> {
    let engine = AstEngine::new(context);
    let mut output = String::with_capacity(template.len());
    let mut copied = 0;

    for caps in SPAN_RE.captures_iter(template) {
        let (Some(whole), Some(span)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        output.push_str(&template[copied..whole.start()]);
        match parse_expression(span.as_str()) {
            Ok(expr) => output.push_str(&engine.evaluate(&expr)?.to_string()),
            Err(_) => output.push_str(whole.as_str()),
        }
        copied = whole.end();
    }

    output.push_str(&template[copied..]);
    Ok(output)
}
