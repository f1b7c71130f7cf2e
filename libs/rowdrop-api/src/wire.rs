//! Host cell encoding.
//!
//! Plain JSON scalars are cell values as-is. Anything richer is an array whose
//! first element is a one-letter tag and whose remaining elements are the
//! payload:
//!
//! ```text
//! ["L", 1, 2, 3]               list
//! ["O", {"a": 1}]              nested object
//! ["d", 1704067200]            date (epoch seconds, midnight UTC)
//! ["D", 1704067200, "UTC"]     datetime (epoch seconds, timezone)
//! ["R", "People", 1]           reference
//! ["r", "People", [1, 2]]      reference list
//! ```

use serde_json::Value;

/// Reserved table listing every user table.
pub const TABLES_TABLE: &str = "_grist_Tables";
/// Reserved table listing every column of every table.
pub const COLUMNS_TABLE: &str = "_grist_Tables_column";

/// Prefix of internal helper columns (display helpers, conditional rules).
pub const HELPER_PREFIX: &str = "gristHelper_";
/// Internal row-ordering column.
pub const MANUAL_SORT: &str = "manualSort";
/// Declared type of the row-ordering column.
pub const MANUAL_SORT_TYPE: &str = "ManualSortPos";

/// Tag of an array-encoded cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireTag {
    List,
    LookUp,
    Dict,
    DateTime,
    Date,
    Skip,
    Censored,
    Reference,
    ReferenceList,
    Exception,
    Pending,
    Unmarshallable,
    Versions,
}

impl WireTag {
    pub fn from_code(code: &str) -> Option<Self> {
        let tag = match code {
            "L" => WireTag::List,
            "l" => WireTag::LookUp,
            "O" => WireTag::Dict,
            "D" => WireTag::DateTime,
            "d" => WireTag::Date,
            "S" => WireTag::Skip,
            "C" => WireTag::Censored,
            "R" => WireTag::Reference,
            "r" => WireTag::ReferenceList,
            "E" => WireTag::Exception,
            "P" => WireTag::Pending,
            "U" => WireTag::Unmarshallable,
            "V" => WireTag::Versions,
            _ => return None,
        };
        Some(tag)
    }

    pub fn code(self) -> &'static str {
        match self {
            WireTag::List => "L",
            WireTag::LookUp => "l",
            WireTag::Dict => "O",
            WireTag::DateTime => "D",
            WireTag::Date => "d",
            WireTag::Skip => "S",
            WireTag::Censored => "C",
            WireTag::Reference => "R",
            WireTag::ReferenceList => "r",
            WireTag::Exception => "E",
            WireTag::Pending => "P",
            WireTag::Unmarshallable => "U",
            WireTag::Versions => "V",
        }
    }

    /// Split a raw cell into its tag and payload.
    ///
    /// Returns `None` for scalars, objects, empty arrays and arrays whose first
    /// element is not a known tag.
    pub fn split(raw: &Value) -> Option<(WireTag, &[Value])> {
        let items = raw.as_array()?;
        let (first, payload) = items.split_first()?;
        let tag = WireTag::from_code(first.as_str()?)?;
        Some((tag, payload))
    }
}

impl std::fmt::Display for WireTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Whether a column key belongs to the host's internal columns.
pub fn is_reserved_column(col_id: &str) -> bool {
    col_id == MANUAL_SORT || col_id.starts_with(HELPER_PREFIX)
}

/// Host truthiness of a raw cell (used for conditional rule columns).
pub fn is_truthy(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
