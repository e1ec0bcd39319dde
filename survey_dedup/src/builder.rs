pub use crate::config::*;

/// A builder for assembling a table row by row.
///
/// Readers use it to turn an export into a [Table]. The identities are the
/// positions of the rows, in the order they were added.
///
/// ```
/// pub use survey_dedup::builder::TableBuilder;
/// pub use survey_dedup::FieldValue;
/// # use survey_dedup::DedupErrors;
///
/// let mut builder = TableBuilder::new(&["CreationDate".to_string(), "answer".to_string()])?;
///
/// builder.add_row_simple(&["2024-03-01 10:00:00", "Yes"])?;
/// builder.add_row(vec![FieldValue::Empty, FieldValue::Text("No".to_string())])?;
///
/// let table = builder.build();
/// assert_eq!(table.len(), 2);
///
/// # Ok::<(), DedupErrors>(())
/// ```
pub struct TableBuilder {
    pub(crate) _table: Table,
}

impl TableBuilder {
    pub fn new(fields: &[String]) -> Result<TableBuilder, DedupErrors> {
        Ok(TableBuilder {
            _table: Table::new(fields)?,
        })
    }

    /// Adds a row of text cells. Blank cells are treated as empty values.
    pub fn add_row_simple(&mut self, cells: &[&str]) -> Result<(), DedupErrors> {
        let values = cells
            .iter()
            .map(|s| {
                if s.trim().is_empty() {
                    FieldValue::Empty
                } else {
                    FieldValue::Text(s.to_string())
                }
            })
            .collect();
        self.add_row(values)
    }

    /// Adds a row of values, in field order.
    ///
    /// Short rows are padded with empty values, as spreadsheets drop the trailing blank cells.
    pub fn add_row(&mut self, mut values: Vec<FieldValue>) -> Result<(), DedupErrors> {
        let row = self._table.records.len();
        let num_fields = self._table.fields.len();
        if values.len() > num_fields {
            return Err(DedupErrors::RowTooLong {
                row,
                len: values.len(),
                num_fields,
            });
        }
        values.resize(num_fields, FieldValue::Empty);
        self._table.records.push(Record {
            id: RecordId(row),
            values,
        });
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self._table.records.len()
    }

    pub fn build(self) -> Table {
        self._table
    }
}
