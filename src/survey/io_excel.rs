// Primitives for reading Excel workbooks.

use calamine::{open_workbook, DataType, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::survey::{
    io_common::{text_cell, unique_header, LoadedSheet},
    *,
};

/// Reads a worksheet of an Excel export: the named one if provided, the
/// first one otherwise. The first row is the header.
pub fn read_excel(path: &str, worksheet_name_o: Option<&str>) -> SurveyResult<LoadedSheet> {
    let wrange = get_range(path, worksheet_name_o)?;

    let mut iter = wrange.rows();
    let header_cells = iter.next().context(EmptyExcelSnafu { path })?;
    let raw_header: Vec<String> = header_cells.iter().map(header_name).collect();
    let header = unique_header(&raw_header);
    debug!("read_excel: header: {:?}", header);

    let mut rows: Vec<Vec<FieldValue>> = Vec::new();
    for (idx, row) in iter.enumerate() {
        let values: Vec<FieldValue> = row
            .iter()
            .map(|cell| cell_value(cell, path, idx + 2))
            .collect();
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(values);
    }
    Ok(LoadedSheet { header, rows })
}

fn get_range(path: &str, worksheet_name_o: Option<&str>) -> SurveyResult<Range<DataType>> {
    debug!(
        "read_excel: path: {:?} worksheet: {:?}",
        &path, &worksheet_name_o
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;

    // A worksheet name was provided, use it.
    if let Some(worksheet_name) = worksheet_name_o {
        let wrange = workbook
            .worksheet_range(worksheet_name)
            .context(MissingWorksheetSnafu {
                path,
                name: worksheet_name,
            })?
            .context(OpeningExcelSnafu { path })?;
        Ok(wrange)
    } else {
        let wrange = workbook
            .worksheet_range_at(0)
            .context(EmptyExcelSnafu { path })?
            .context(OpeningExcelSnafu { path })?;
        Ok(wrange)
    }
}

fn header_name(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.clone(),
        DataType::Empty => String::new(),
        other => other.to_string(),
    }
}

fn cell_value(cell: &DataType, path: &str, lineno: usize) -> FieldValue {
    match cell {
        DataType::Empty => FieldValue::Empty,
        DataType::String(s) => text_cell(s),
        DataType::Float(x) => FieldValue::Number(*x),
        DataType::Int(x) => FieldValue::Number(*x as f64),
        DataType::Bool(b) => FieldValue::Bool(*b),
        DataType::DateTime(serial) => match excel_serial_to_datetime(*serial) {
            Some(t) => FieldValue::Time(t),
            None => FieldValue::Number(*serial),
        },
        DataType::Error(e) => {
            warn!(
                "read_excel: {}: error cell {:?} on line {} read as empty",
                simplify_file_name(path),
                e,
                lineno
            );
            FieldValue::Empty
        }
        #[allow(unreachable_patterns)]
        other => text_cell(&other.to_string()),
    }
}

/// Excel stores dates as a number of days since 1899-12-30, the fraction
/// being the time of day.
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let ms = (serial * 86_400_000.0).round() as i64;
    base.checked_add_signed(Duration::try_milliseconds(ms)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    #[test]
    fn serial_dates() {
        // 2024-03-01 is day 45352.
        assert_eq!(
            excel_serial_to_datetime(45352.0),
            Some(dt("2024-03-01 00:00:00"))
        );
        assert_eq!(
            excel_serial_to_datetime(45352.5),
            Some(dt("2024-03-01 12:00:00"))
        );
        assert_eq!(
            excel_serial_to_datetime(45352.0 + 10.0 / (24.0 * 60.0)),
            Some(dt("2024-03-01 00:10:00"))
        );
        assert_eq!(excel_serial_to_datetime(f64::NAN), None);
    }

    #[test]
    fn cells() {
        assert_eq!(cell_value(&DataType::Empty, "a.xlsx", 2), FieldValue::Empty);
        assert_eq!(
            cell_value(&DataType::String("  ".to_string()), "a.xlsx", 2),
            FieldValue::Empty
        );
        assert_eq!(
            cell_value(&DataType::Int(3), "a.xlsx", 2),
            FieldValue::Number(3.0)
        );
        assert_eq!(
            cell_value(&DataType::DateTime(45352.5), "a.xlsx", 2),
            FieldValue::Time(dt("2024-03-01 12:00:00"))
        );
        assert_eq!(
            cell_value(
                &DataType::Error(calamine::CellErrorType::NA),
                "a.xlsx",
                2
            ),
            FieldValue::Empty
        );
    }

    #[test]
    fn missing_workbook() {
        let res = read_excel("/nonexistent/surveydedup/responses.xlsx", None);
        assert!(matches!(res, Err(SurveyError::OpeningExcel { .. })));
    }
}
