use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::wire::{is_reserved_column, HELPER_PREFIX};

/// One row as delivered by the host (still encoded).
///
/// `cells` holds every visible column, `id` included. Internal columns never
/// land in `cells`: helper columns are kept aside in `helpers` because
/// conditional style rules read them, the row-ordering column is discarded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct RowRecord {
    pub id: i64,
    pub cells: BTreeMap<String, Value>,
    pub helpers: BTreeMap<String, Value>,
}

impl RowRecord {
    /// Split a flat `column -> value` mapping into visible and helper cells.
    pub fn from_map(map: BTreeMap<String, Value>) -> Result<Self, SourceError> {
        let id = map
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| SourceError::format("row has no integer 'id'"))?;

        let mut cells = BTreeMap::new();
        let mut helpers = BTreeMap::new();
        for (key, value) in map {
            if key.starts_with(HELPER_PREFIX) {
                helpers.insert(key, value);
            } else if !is_reserved_column(&key) {
                cells.insert(key, value);
            }
        }
        Ok(Self { id, cells, helpers })
    }

    pub fn get(&self, col_id: &str) -> Option<&Value> {
        self.cells.get(col_id)
    }

    pub fn helper(&self, col_id: &str) -> Option<&Value> {
        self.helpers.get(col_id)
    }
}

impl TryFrom<BTreeMap<String, Value>> for RowRecord {
    type Error = SourceError;

    fn try_from(map: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        Self::from_map(map)
    }
}
