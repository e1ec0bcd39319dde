// Primitives for reading CSV files.

use std::fs::File;

use crate::survey::{
    io_common::{text_cell, unique_header, LoadedSheet},
    *,
};

/// Reads a CSV export. The first row is the header; all the cells are read
/// as text, and blank cells as empty values.
pub fn read_csv(path: &str) -> SurveyResult<LoadedSheet> {
    let mut records = get_records(path)?;

    let header_r = match records.next() {
        Some(r) => r.context(CsvLineParseSnafu { path, lineno: 1usize })?,
        None => whatever!("The CSV file {} is empty", path),
    };
    let raw_header: Vec<String> = header_r
        .iter()
        .enumerate()
        .map(|(idx, s)| {
            if idx == 0 {
                s.trim_start_matches('\u{feff}').to_string()
            } else {
                s.to_string()
            }
        })
        .collect();
    let header = unique_header(&raw_header);
    debug!("read_csv: header: {:?}", header);

    let mut rows: Vec<Vec<FieldValue>> = Vec::new();
    for (idx, line_r) in records.enumerate() {
        // The header is line 1.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        let row: Vec<FieldValue> = line.iter().map(text_cell).collect();
        if row.iter().all(|v| v.is_empty()) {
            debug!("read_csv: skipping blank line {}", lineno);
            continue;
        }
        rows.push(row);
    }
    Ok(LoadedSheet { header, rows })
}

fn get_records(path: &str) -> SurveyResult<csv::StringRecordsIntoIter<File>> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    Ok(rdr.into_records())
}
