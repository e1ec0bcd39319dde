//! Canonical forms of field values, for exact equality after normalization.

use crate::config::FieldValue;

/// Trims, lowercases and collapses the internal whitespace runs to one space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

/// The canonical form of a single-valued field. Empty values map to the empty string.
pub fn normalize_scalar(value: &FieldValue) -> String {
    match value.as_text() {
        Some(s) => normalize_text(&s),
        None => "".to_string(),
    }
}

/// The canonical form of a field holding a list of items separated by commas or semicolons.
///
/// The order of the items does not matter: they are normalized, the blank ones dropped,
/// and the rest sorted.
pub fn normalize_multivalue(value: &FieldValue) -> String {
    let s = match value.as_text() {
        Some(s) => s,
        None => return "".to_string(),
    };
    let mut parts: Vec<String> = s
        .split(|c| c == ',' || c == ';')
        .map(normalize_text)
        .filter(|p| !p.is_empty())
        .collect();
    parts.sort();
    parts.join(",")
}
