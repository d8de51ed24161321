//! Rendering of filter values as SQL literals.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(?:0|[1-9]\d*)(?:\.\d+)?$").expect("valid numeric regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Render a JSON value as a T-SQL literal.
///
/// Strings that look boolean become `1`/`0`, numeric strings render bare
/// (leading-zero codes such as `"007"` stay quoted), date-like strings are
/// normalized to ISO form, and everything else is quoted with `''` escaping.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => bool_literal(*b).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => render_str(s),
        Value::Array(items) => render_list(items),
        Value::Object(_) => quote(&value.to_string()),
    }
}

/// `(a, b, c)` for IN lists; a scalar renders as a one-element list.
pub fn render_in_list(value: &Value) -> String {
    match value {
        Value::Array(items) => render_list(items),
        other => format!("({})", render_value(other)),
    }
}

/// LIKE pattern: wrapped in `%` unless the caller supplied wildcards.
pub fn render_like(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.contains('%') {
        quote(&text)
    } else {
        quote(&format!("%{}%", text))
    }
}

fn render_list(items: &[Value]) -> String {
    let rendered: Vec<String> = items.iter().map(render_value).collect();
    format!("({})", rendered.join(", "))
}

fn render_str(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return bool_literal(true).to_string();
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return bool_literal(false).to_string();
    }
    if NUMERIC.is_match(trimmed) {
        return trimmed.to_string();
    }
    if let Some(date) = normalize_date(trimmed) {
        return quote(&date);
    }
    quote(s)
}

fn bool_literal(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

/// ISO-normalized form of a date or datetime string, if it parses as one.
pub fn normalize_date(text: &str) -> Option<String> {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Single-quote a string, doubling embedded quotes.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
