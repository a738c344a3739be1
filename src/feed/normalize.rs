use chrono::{DateTime, NaiveDate, NaiveDateTime};
use scraper::Html;
use serde_json::Value;

use crate::util::collapse_whitespace;

/// Placeholder strings the upstream feed uses instead of a real date
const DATE_SENTINELS: &[&str] = &["", "N/A", "TBD"];

/// Date-only layouts seen in release plan payloads
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Date-time layouts; only the date part is kept
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Strips HTML markup from a feed value, returning plain text.
///
/// Tags are dropped, entities are decoded and whitespace is collapsed so
/// that `<p>Fast&nbsp;<b>search</b></p>` becomes `Fast search`. Text without
/// any markup skips the HTML parser entirely.
pub fn clean_html(value: &str) -> String {
    if !value.contains('<') && !value.contains('&') {
        return collapse_whitespace(value).into_owned();
    }

    let fragment = Html::parse_fragment(value);
    let text = fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    collapse_whitespace(&text).into_owned()
}

/// Parses a feed date string.
///
/// Returns `None` for sentinels (`""`, `"N/A"`, `"TBD"`, any case) and for
/// anything that does not match a known layout. Never substitutes a default.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if DATE_SENTINELS
        .iter()
        .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
    {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Renders a JSON value as the text the rest of the pipeline compares.
///
/// Strings pass through, `null` becomes empty, scalars use their JSON
/// spelling and nested values keep their compact JSON form.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
