// Locale normalization - amounts, dates and multi-part descriptions

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::str::FromStr;

// ============================================================================
// AMOUNTS
// ============================================================================

const CURRENCY_SYMBOLS: &[char] = &['€', '$', '£', '¥'];

/// Parse a bank amount into a canonical decimal.
///
/// Handles Dutch (`1.234,56`, `-12,30`, `+45,00`) and US (`1,234.56`)
/// separators, currency symbols and embedded spaces. When only a comma is
/// present it is a decimal separator if at most two digits follow it,
/// otherwise a thousands separator.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let canonical = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(comma), None) => {
            let after = &cleaned[comma + 1..];
            if after.len() <= 2 && after.chars().all(|c| c.is_ascii_digit()) {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, _) => cleaned,
    };

    let unsigned = canonical.strip_prefix('+').unwrap_or(&canonical);
    Decimal::from_str(unsigned).ok()
}

// ============================================================================
// DATES
// ============================================================================

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d", "%d.%m.%Y", "%Y%m%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

/// Parse a date, returning the time of day when the value carries one.
pub fn parse_date(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            let time = dt.time();
            let time = (time != NaiveTime::MIN).then_some(time);
            return Some((dt.date(), time));
        }
    }

    // Spreadsheet integer cells sometimes arrive as `20240301.0`
    let value = value.strip_suffix(".0").unwrap_or(value);

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .map(|date| (date, None))
}

// ============================================================================
// TEXT
// ============================================================================

/// Collapse every run of whitespace (tabs, newlines) into one space.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join description parts in source order with single spaces, skipping
/// empty parts.
pub fn join_description_parts<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| collapse_whitespace(p.as_ref()))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
