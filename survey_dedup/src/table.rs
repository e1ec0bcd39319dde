use std::collections::{HashMap, HashSet};

use log::debug;

use crate::config::*;

impl Table {
    /// Creates an empty table. The field names must be unique.
    pub fn new(fields: &[String]) -> Result<Table, DedupErrors> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (idx, name) in fields.iter().enumerate() {
            if index.insert(name.clone(), idx).is_some() {
                return Err(DedupErrors::DuplicateField(name.clone()));
            }
        }
        Ok(Table {
            fields: fields.to_vec(),
            index,
            records: Vec::new(),
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The column position of a field, or a configuration error naming it.
    pub fn field_index(&self, name: &str) -> Result<usize, DedupErrors> {
        self.index
            .get(name)
            .cloned()
            .ok_or_else(|| DedupErrors::MissingField(name.to_string()))
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        // Records are stored by increasing identity.
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|pos| &self.records[pos])
    }

    pub fn value(&self, id: RecordId, field_idx: usize) -> Option<&FieldValue> {
        self.get(id).and_then(|r| r.values.get(field_idx))
    }

    /// Returns a new snapshot without the given records.
    ///
    /// The surviving records keep their identities. Unknown identities are ignored.
    pub fn without(&self, removed: &[RecordId]) -> Table {
        let removed: HashSet<RecordId> = removed.iter().cloned().collect();
        let records: Vec<Record> = self
            .records
            .iter()
            .filter(|r| !removed.contains(&r.id))
            .cloned()
            .collect();
        debug!(
            "without: {} records -> {} records",
            self.records.len(),
            records.len()
        );
        Table {
            fields: self.fields.clone(),
            index: self.index.clone(),
            records,
        }
    }
}
