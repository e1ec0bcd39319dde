// The JSON report and the cleaned export.

use chrono::NaiveDateTime;
use serde_json::json;
use serde_json::Map as JSMap;
use rust_xlsxwriter::Workbook;
use survey_dedup::proximity::{centroid, shares_location};

use crate::survey::*;

const RANGE_FORMAT: &str = "%d/%m/%Y %H:%M";

fn time_js(t: Option<NaiveDateTime>) -> JSValue {
    match t {
        Some(t) => json!(t.format(TIME_FORMAT).to_string()),
        None => JSValue::Null,
    }
}

/// "01/03/2024 10:00 → 01/03/2024 10:05", or an empty string without times.
pub fn format_range(group: &DuplicateGroup) -> String {
    match (group.first_time, group.last_time) {
        (Some(first), Some(last)) => format!(
            "{} → {}",
            first.format(RANGE_FORMAT),
            last.format(RANGE_FORMAT)
        ),
        _ => String::new(),
    }
}

/// Why the records of a group are considered as the same response.
pub fn group_reason(group: &DuplicateGroup, window_minutes: i64, same_location: bool) -> String {
    let location = if same_location {
        ", at the same location"
    } else {
        ""
    };
    format!(
        "Same content submitted within {} minutes or less{}. One response is kept and {} removed.",
        window_minutes,
        location,
        group.size.saturating_sub(1)
    )
}

fn has_coordinates(table: &Table, outcome: &AnalysisOutcome) -> bool {
    table.has_field(&outcome.lat_field) && table.has_field(&outcome.lon_field)
}

fn group_js(
    position: usize,
    group: &DuplicateGroup,
    table: &Table,
    settings: &AnalysisSettings,
    outcome: &AnalysisOutcome,
) -> SurveyResult<JSValue> {
    let rules = &outcome.rules;
    let keep = select_keep(group, table, &rules.time_field, settings.keep_policy)
        .context(AnalysisSnafu {})?;
    let same_location = if has_coordinates(table, outcome) {
        shares_location(
            table,
            &group.identities,
            &outcome.lat_field,
            &outcome.lon_field,
        )
        .context(AnalysisSnafu {})?
    } else {
        false
    };
    let mut content: JSMap<String, JSValue> = JSMap::new();
    for (field, value) in group.canonical_content.iter() {
        content.insert(field.clone(), json!(value));
    }
    let records: Vec<usize> = group.identities.iter().map(|id| id.0).collect();
    Ok(json!({
        "group": position + 1,
        "responses": group.size,
        "toRemove": group.size.saturating_sub(1),
        "first": time_js(group.first_time),
        "last": time_js(group.last_time),
        "range": format_range(group),
        "reason": group_reason(group, rules.window_minutes, same_location),
        "keep": keep.0,
        "records": records,
        "content": content,
        "digest": group.content_digest,
    }))
}

fn close_pairs_js(pairs: &Option<Vec<ClosePair>>) -> JSValue {
    match pairs {
        None => JSValue::Null,
        Some(pairs) => {
            let l: Vec<JSValue> = pairs
                .iter()
                .map(|p| {
                    json!({
                        "a": p.id_a.0,
                        "b": p.id_b.0,
                        // Centimeters are enough for display.
                        "distanceMeters": (p.distance_m * 100.0).round() / 100.0,
                    })
                })
                .collect();
            json!(l)
        }
    }
}

pub fn build_report(
    settings: &AnalysisSettings,
    table: &Table,
    outcome: &AnalysisOutcome,
) -> SurveyResult<JSValue> {
    let rules = &outcome.rules;
    let summary = &outcome.analysis.summary;

    let mut groups: Vec<JSValue> = Vec::new();
    for (idx, group) in outcome.analysis.groups.iter().enumerate() {
        groups.push(group_js(idx, group, table, settings, outcome)?);
    }

    let multivalue: Vec<&String> = rules
        .content_fields
        .iter()
        .filter(|f| rules.multivalue_fields.is_multivalue(f))
        .collect();

    let map_center = if has_coordinates(table, outcome) {
        centroid(table, &outcome.lat_field, &outcome.lon_field)
            .context(AnalysisSnafu {})?
            .map(|c| json!({"lat": c.lat, "lon": c.lon}))
            .unwrap_or(JSValue::Null)
    } else {
        JSValue::Null
    };

    let removed: Vec<usize> = outcome.plan.removed().iter().map(|id| id.0).collect();

    Ok(json!({
        "config": {
            "title": settings.title,
            "timeField": rules.time_field,
            "windowMinutes": rules.window_minutes,
            "keepPolicy": keep_policy_name(settings.keep_policy),
            "contentFields": rules.content_fields,
            "multiValueFields": multivalue,
        },
        "summary": {
            "totalResponses": summary.total,
            "duplicatesDetected": summary.in_groups,
            "toRemove": summary.to_remove,
            "validated": summary.validated,
            "lastResponse": time_js(summary.last_response),
            "unreadableTimes": summary.coercion_issues,
        },
        "groups": groups,
        "closePairs": close_pairs_js(&outcome.close_pairs),
        "mapCenter": map_center,
        "cleanup": {
            "policy": keep_policy_name(settings.keep_policy),
            "removed": removed,
            "remaining": outcome.cleaned.len(),
            "residualGroups": outcome.residual_groups,
        },
    }))
}

/// Writes the cleaned table: an Excel workbook for a `.xlsx` path, CSV otherwise.
pub fn write_cleaned(table: &Table, path: &str) -> SurveyResult<()> {
    let is_xlsx = Path::new(path)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false);
    if is_xlsx {
        write_cleaned_xlsx(table, path)
    } else {
        write_cleaned_csv(table, path)
    }
}

/// Writes the table as CSV, with the same columns as the input.
pub fn write_cleaned_csv(table: &Table, path: &str) -> SurveyResult<()> {
    let mut wtr = csv::Writer::from_path(path).context(CsvWriteSnafu { path })?;
    wtr.write_record(table.fields())
        .context(CsvWriteSnafu { path })?;
    for record in table.records().iter() {
        let cells: Vec<String> = record
            .values
            .iter()
            .map(|v| v.as_text().unwrap_or_default())
            .collect();
        wtr.write_record(&cells).context(CsvWriteSnafu { path })?;
    }
    wtr.flush().context(WritingFileSnafu { path })?;
    Ok(())
}

/// Writes the table as a single worksheet. Numbers and booleans keep their
/// cell type, times are written as text.
pub fn write_cleaned_xlsx(table: &Table, path: &str) -> SurveyResult<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in table.fields().iter().enumerate() {
        sheet
            .write_string(0, col as u16, name)
            .context(XlsxWriteSnafu { path })?;
    }
    for (row, record) in table.records().iter().enumerate() {
        let r = (row + 1) as u32;
        for (col, value) in record.values.iter().enumerate() {
            let c = col as u16;
            let res = match value {
                FieldValue::Empty => continue,
                FieldValue::Number(x) => sheet.write_number(r, c, *x),
                FieldValue::Bool(b) => sheet.write_boolean(r, c, *b),
                other => sheet.write_string(r, c, other.as_text().unwrap_or_default()),
            };
            res.context(XlsxWriteSnafu { path })?;
        }
    }
    workbook.save(path).context(XlsxWriteSnafu { path })?;
    Ok(())
}
