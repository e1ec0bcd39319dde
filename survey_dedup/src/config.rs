// ********* Input data structures ***********

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;

use chrono::NaiveDateTime;

/// The stable identity of a record: its 0-based position in the table as it was loaded.
///
/// Identities survive cleanup. A table with removed records keeps the
/// identities of the survivors, which is what downstream exports refer to.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct RecordId(pub usize);

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All the kinds of values that a cell of a survey export may hold.
#[derive(PartialEq, Debug, Clone)]
pub enum FieldValue {
    /// A null, a missing key or a blank cell.
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// A timestamp that was already typed by the reader (Excel date cells,
    /// ArcGIS date fields).
    Time(NaiveDateTime),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }

    /// The string form of the value, as written in exports.
    /// Empty values have no string form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Empty => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(x) => Some(x.to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Time(t) => Some(t.format(TIME_FORMAT).to_string()),
        }
    }
}

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(PartialEq, Debug, Clone)]
pub struct Record {
    pub id: RecordId,
    /// One value per field of the schema, in schema order.
    pub values: Vec<FieldValue>,
}

/// An immutable snapshot of a survey extract.
///
/// The field names are validated once at construction. Records are always
/// stored by increasing identity.
#[derive(PartialEq, Debug, Clone)]
pub struct Table {
    pub(crate) fields: Vec<String>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) records: Vec<Record>,
}

// ******** Output data structures *********

/// A maximal run of time-sorted records sharing the same canonical content,
/// where consecutive records are at most one window apart.
///
/// Groups always hold at least 2 records.
#[derive(PartialEq, Debug, Clone)]
pub struct DuplicateGroup {
    /// The members, in time order.
    pub identities: Vec<RecordId>,
    pub size: usize,
    pub first_time: Option<NaiveDateTime>,
    pub last_time: Option<NaiveDateTime>,
    /// The shared normalized content, per content field, in rule order.
    pub canonical_content: Vec<(String, String)>,
    /// SHA-256 of the canonical content, for display and audit.
    pub content_digest: String,
}

/// A value that is present but cannot be understood for its role.
///
/// This is not an error: the record is treated as having an undefined value
/// and the computation proceeds.
#[derive(PartialEq, Debug, Clone)]
pub struct ValueCoercionIssue {
    pub record: RecordId,
    pub field: String,
    pub raw: String,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Summary {
    pub total: usize,
    /// All the records that belong to a group.
    pub in_groups: usize,
    /// Sum over the groups of (size - 1).
    pub to_remove: usize,
    pub validated: usize,
    pub last_response: Option<NaiveDateTime>,
    pub coercion_issues: usize,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Analysis {
    pub groups: Vec<DuplicateGroup>,
    pub issues: Vec<ValueCoercionIssue>,
    pub summary: Summary,
}

/// The decision taken for one group during cleanup.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct KeepDecision {
    pub keep: RecordId,
    pub remove: Vec<RecordId>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct CleanupPlan {
    pub decisions: Vec<KeepDecision>,
}

impl CleanupPlan {
    pub fn removed(&self) -> Vec<RecordId> {
        let mut res: Vec<RecordId> = self
            .decisions
            .iter()
            .flat_map(|d| d.remove.iter().cloned())
            .collect();
        res.sort();
        res
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct ClosePair {
    pub id_a: RecordId,
    pub id_b: RecordId,
    pub distance_m: f64,
}

/// Errors that prevent an analysis from running.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum DedupErrors {
    /// A field named in the configuration is not a column of the table.
    MissingField(String),
    /// Two columns carry the same name.
    DuplicateField(String),
    /// A row has more values than there are fields.
    RowTooLong { row: usize, len: usize, num_fields: usize },
    InvalidWindow(i64),
    /// None of the records referenced by a group is present in the table.
    UnknownRecord(RecordId),
    EmptyGroup,
}

impl Error for DedupErrors {}

impl Display for DedupErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupErrors::MissingField(name) => {
                write!(f, "configuration error: field {:?} is not in the table", name)
            }
            DedupErrors::DuplicateField(name) => {
                write!(f, "configuration error: field {:?} appears twice", name)
            }
            DedupErrors::RowTooLong {
                row,
                len,
                num_fields,
            } => write!(
                f,
                "row {} has {} values but the table has {} fields",
                row, len, num_fields
            ),
            DedupErrors::InvalidWindow(w) => {
                write!(f, "configuration error: invalid window of {} minutes", w)
            }
            DedupErrors::UnknownRecord(id) => write!(f, "record {} is not in the table", id),
            DedupErrors::EmptyGroup => write!(f, "the group has no members"),
        }
    }
}

// ********* Configuration **********

/// Which record to keep in each group during cleanup.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum KeepPolicy {
    MostRecent,
    Oldest,
}

/// How to decide which content fields hold delimited, unordered lists.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum MultiValueFields {
    /// Exactly these fields.
    Named(Vec<String>),
    /// Every field whose name contains this token, ignoring case.
    Marker(String),
}

impl MultiValueFields {
    pub fn is_multivalue(&self, field: &str) -> bool {
        match self {
            MultiValueFields::Named(names) => names.iter().any(|n| n == field),
            MultiValueFields::Marker(token) => field
                .to_lowercase()
                .contains(token.to_lowercase().as_str()),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DedupRules {
    pub time_field: String,
    /// Maximum gap between consecutive records of a group.
    pub window_minutes: i64,
    /// The order matters: it is the order of the canonical key.
    pub content_fields: Vec<String>,
    pub multivalue_fields: MultiValueFields,
}

impl DedupRules {
    pub const DEFAULT_WINDOW_MINUTES: i64 = 10;
    pub const DEFAULT_MULTIVALUE_MARKER: &'static str = "factor";

    pub fn new(time_field: &str, content_fields: &[String]) -> DedupRules {
        DedupRules {
            time_field: time_field.to_string(),
            window_minutes: DedupRules::DEFAULT_WINDOW_MINUTES,
            content_fields: content_fields.to_vec(),
            multivalue_fields: MultiValueFields::Marker(
                DedupRules::DEFAULT_MULTIVALUE_MARKER.to_string(),
            ),
        }
    }
}
