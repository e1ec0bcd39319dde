use std::collections::HashSet;
use std::path::Path;

use survey_dedup::builder::TableBuilder;

use crate::survey::*;

/// The bookkeeping columns of the survey exports. They never describe the
/// content of a response.
pub const META_FIELDS: [&str; 7] = [
    "ObjectID",
    "GlobalID",
    "instance_id",
    "CreationDate",
    "EditDate",
    "Creator",
    "Editor",
];

/// The columns that receive the point geometry of each feature of an ArcGIS query.
pub const GEOMETRY_LON_FIELD: &str = "_lon";
pub const GEOMETRY_LAT_FIELD: &str = "_lat";

/// The raw content of one data source, before it becomes a table.
#[derive(PartialEq, Debug, Clone)]
pub struct LoadedSheet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// A text cell. Blank cells are empty values.
pub fn text_cell(s: &str) -> FieldValue {
    if s.trim().is_empty() {
        FieldValue::Empty
    } else {
        FieldValue::Text(s.to_string())
    }
}

/// Makes the column names usable as table fields: blank names get a
/// positional name and repeated names get a numeric suffix.
pub fn unique_header(raw: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut res: Vec<String> = Vec::new();
    for (idx, name) in raw.iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("column_{}", idx + 1)
        } else {
            name.trim().to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        if candidate != base {
            warn!("unique_header: column {:?} renamed to {:?}", base, candidate);
        }
        seen.insert(candidate.clone());
        res.push(candidate);
    }
    res
}

/// All the fields except the bookkeeping columns, the time, the coordinates
/// and the excluded ones, in table order.
pub fn default_content_fields(
    fields: &[String],
    time_field: &str,
    lat_field: &str,
    lon_field: &str,
    excluded: &[String],
) -> Vec<String> {
    fields
        .iter()
        .filter(|f| !META_FIELDS.iter().any(|m| m.eq_ignore_ascii_case(f)))
        .filter(|f| f.as_str() != time_field && f.as_str() != lat_field && f.as_str() != lon_field)
        .filter(|f| !excluded.contains(*f))
        .cloned()
        .collect()
}

/// Concatenates the sources into one table. All the sources must have the
/// same columns, in the same order.
pub fn merge_sheets(sheets: Vec<(String, LoadedSheet)>) -> SurveyResult<Table> {
    let header = match sheets.first() {
        Some((_, sheet)) => sheet.header.clone(),
        None => whatever!("No data source to read"),
    };
    let mut builder = TableBuilder::new(&header).context(InvalidTableSnafu {
        path: sheets
            .first()
            .map(|(p, _)| simplify_file_name(p))
            .unwrap_or_default(),
    })?;
    for (path, sheet) in sheets.into_iter() {
        if sheet.header != header {
            debug!(
                "merge_sheets: expected {:?}, got {:?}",
                header, sheet.header
            );
            return HeaderMismatchSnafu { path }.fail();
        }
        let before = builder.num_rows();
        for row in sheet.rows.into_iter() {
            builder.add_row(row).context(InvalidTableSnafu {
                path: simplify_file_name(&path),
            })?;
        }
        info!(
            "merge_sheets: {} responses read from {:?}, {} in total",
            builder.num_rows() - before,
            simplify_file_name(&path),
            builder.num_rows()
        );
    }
    Ok(builder.build())
}
