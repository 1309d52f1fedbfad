use crate::ast::Value;
use crate::data::{DateStyle, Locale};
use chrono::{DateTime, NaiveDate};
use std::cmp::Ordering;

/// Parses a number written with the locale's separators, e.g. `1.234,5` under a
/// comma-decimal locale. Grouping separators are only accepted between groups of
/// exactly three digits, so `1,5` is never read as fifteen.
pub fn parse_number(text: &str, locale: &Locale) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.strip_prefix('+').unwrap_or(text)),
    };

    let mut parts = unsigned.splitn(2, locale.decimal_separator);
    let integer = parts.next().unwrap_or("");
    let fraction = parts.next();

    let digits = match locale.grouping_separator {
        Some(sep) if integer.contains(sep) => {
            let groups: Vec<&str> = integer.split(sep).collect();
            let (head, tail) = groups.split_first()?;
            let head_ok = (1..=3).contains(&head.len());
            let tail_ok = tail.iter().all(|g| g.len() == 3);
            if !head_ok || !tail_ok {
                return None;
            }
            groups.concat()
        }
        _ => integer.to_string(),
    };

    if digits.is_empty() && fraction.is_none() {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut normalized = format!("{}{}", sign, if digits.is_empty() { "0" } else { &digits });
    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        normalized.push('.');
        normalized.push_str(fraction);
    }

    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parses a calendar date. ISO `YYYY-MM-DD` always wins; otherwise the locale's
/// date style decides how `03/04/2024` is read. RFC 3339 timestamps keep their date.
pub fn parse_date(text: &str, locale: &Locale) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }

    let formats: &[&str] = match locale.date_style {
        DateStyle::DayFirst => &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"],
        DateStyle::MonthFirst => &["%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y"],
        DateStyle::YearFirst => &["%Y/%m/%d", "%Y.%m.%d"],
    };
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Reads a value as a number, coercing text with the locale.
pub fn as_number(value: &Value, locale: &Locale) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Text(s) => parse_number(s, locale),
        _ => None,
    }
}

/// Reads a value as a date, coercing text with the locale.
pub fn as_date(value: &Value, locale: &Locale) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Text(s) => parse_date(s, locale),
        _ => None,
    }
}

/// Orders two values numerically or chronologically, coercing text.
///
/// Returns `None` when either side is missing or the pair cannot be coerced to a
/// common type.
pub fn compare(left: &Value, right: &Value, locale: &Locale) -> Option<Ordering> {
    if left.is_missing() || right.is_missing() {
        return None;
    }
    let has_date = matches!(left, Value::Date(_)) || matches!(right, Value::Date(_));
    if !has_date {
        if let (Some(a), Some(b)) = (as_number(left, locale), as_number(right, locale)) {
            return a.partial_cmp(&b);
        }
    }
    match (as_date(left, locale), as_date(right, locale)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

/// Equality with coercion: numbers and dates compare by value, text case-insensitively.
pub fn values_equal(left: &Value, right: &Value, locale: &Locale) -> bool {
    match (left, right) {
        (Value::Missing, Value::Missing) => true,
        (Value::Missing, _) | (_, Value::Missing) => false,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        _ => match compare(left, right, locale) {
            Some(ordering) => ordering == Ordering::Equal,
            None => fold_text(&left.to_string()) == fold_text(&right.to_string()),
        },
    }
}

/// Case and surrounding-whitespace insensitive form of a text.
pub fn fold_text(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comma_decimal() -> Locale {
        Locale {
            decimal_separator: ',',
            grouping_separator: Some('.'),
            date_style: DateStyle::DayFirst,
        }
    }

    #[test]
    fn test_parse_number_default_locale() {
        let locale = Locale::default();
        assert_eq!(parse_number("15", &locale), Some(15.0));
        assert_eq!(parse_number(" -2.5 ", &locale), Some(-2.5));
        assert_eq!(parse_number("1,234,567.5", &locale), Some(1234567.5));
        assert_eq!(parse_number(".5", &locale), Some(0.5));
        assert_eq!(parse_number("1,5", &locale), None);
        assert_eq!(parse_number("12a", &locale), None);
        assert_eq!(parse_number("", &locale), None);
        assert_eq!(parse_number("1.", &locale), None);
    }

    #[test]
    fn test_parse_number_comma_decimal_locale() {
        let locale = comma_decimal();
        assert_eq!(parse_number("1.234,5", &locale), Some(1234.5));
        assert_eq!(parse_number("3,75", &locale), Some(3.75));
        assert_eq!(parse_number("3.75", &locale), None);
    }

    #[test]
    fn test_parse_date_styles() {
        let day_first = Locale::default();
        let month_first = Locale {
            date_style: DateStyle::MonthFirst,
            ..Locale::default()
        };
        let expected = NaiveDate::from_ymd_opt(2024, 4, 3);
        assert_eq!(parse_date("2024-04-03", &month_first), expected);
        assert_eq!(parse_date("03/04/2024", &day_first), expected);
        assert_eq!(parse_date("04/03/2024", &month_first), expected);
        assert_eq!(parse_date("2024-04-03T10:00:00Z", &day_first), expected);
        assert_eq!(parse_date("31/31/2024", &day_first), None);
        assert_eq!(parse_date("soon", &day_first), None);
    }

    #[test]
    fn test_equality_coerces_before_falling_back_to_text() {
        let locale = Locale::default();
        assert!(values_equal(&Value::from("15"), &Value::Number(15.0), &locale));
        assert!(values_equal(&Value::from(" Yes"), &Value::from("yes"), &locale));
        assert!(values_equal(
            &Value::from("03/04/2024"),
            &Value::Date(NaiveDate::from_ymd_opt(2024, 4, 3).unwrap()),
            &locale
        ));
        assert!(!values_equal(&Value::Missing, &Value::from(""), &locale));
        assert_eq!(
            compare(&Value::from("abc"), &Value::Number(1.0), &locale),
            None
        );
    }
}
