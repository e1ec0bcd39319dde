use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::config::FieldValue;

// The layouts found in survey exports, tried in order.
// Day-first is preferred over month-first for numeric dates without AM/PM.
const DATETIME_LAYOUTS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_LAYOUTS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Coerces a value into an instant.
///
/// Numbers are read as Unix epoch milliseconds, which is how feature services
/// encode their date fields. Returns `None` for empty values and for anything
/// that cannot be understood as a time.
pub fn parse_instant(value: &FieldValue) -> Option<NaiveDateTime> {
    match value {
        FieldValue::Time(t) => Some(*t),
        FieldValue::Number(ms) if ms.is_finite() => {
            DateTime::from_timestamp_millis(ms.round() as i64).map(|dt| dt.naive_utc())
        }
        FieldValue::Text(s) => parse_instant_text(s.trim()),
        _ => None,
    }
}

fn parse_instant_text(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for layout in DATETIME_LAYOUTS.iter() {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(t);
        }
    }
    for layout in DATE_LAYOUTS.iter() {
        if let Ok(d) = NaiveDate::parse_from_str(s, layout) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}
