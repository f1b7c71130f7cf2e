use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use rowdrop_api::{ColumnarTable, RenderConfig, SourceError};

// ═══════════════════════════════════════════════════════════════
//  Document format
// ═══════════════════════════════════════════════════════════════

fn default_base_url() -> String {
    "http://localhost".to_string()
}

fn default_column_type() -> String {
    "Any".to_string()
}

/// A whole host document in one JSON value.
///
/// ```json
/// {
///   "baseUrl": "https://h", "token": "t", "selectedTable": "People",
///   "options": {"templateColumnId": 1},
///   "tables": [{"tableId": "People",
///               "columns": [{"id": 1, "colId": "name", "type": "Text"}],
///               "rows": [{"id": 1, "name": "Al"}]}]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDocument {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    /// Defaults to the first table.
    #[serde(default)]
    pub selected_table: Option<String>,
    #[serde(default)]
    pub options: Option<RenderConfig>,
    pub tables: Vec<TableDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub table_id: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Assigned after the highest explicit id when missing.
    #[serde(default)]
    pub id: Option<i64>,
    pub col_id: String,
    #[serde(rename = "type", default = "default_column_type")]
    pub col_type: String,
    #[serde(default)]
    pub label: Option<String>,
    /// JSON text or an inline object.
    #[serde(default)]
    pub widget_options: Option<Value>,
    /// Helper column keys of the conditional rules.
    #[serde(default)]
    pub rules: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Stored form
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub(crate) struct StoredColumn {
    pub id: i64,
    pub def: ColumnDef,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredTable {
    pub id: i64,
    pub table_id: String,
    pub columns: Vec<StoredColumn>,
    pub rows: Vec<Map<String, Value>>,
}

/// Number tables and columns the way the host would.
pub(crate) fn store(tables: Vec<TableDef>) -> Result<Vec<StoredTable>, SourceError> {
    let mut next_id = tables
        .iter()
        .flat_map(|t| t.columns.iter().filter_map(|c| c.id))
        .max()
        .unwrap_or(0)
        + 1;

    let mut stored = Vec::with_capacity(tables.len());
    for (pos, table) in tables.into_iter().enumerate() {
        if table.table_id.starts_with('_') {
            return Err(SourceError::format(format!(
                "table id '{}' is reserved",
                table.table_id
            )));
        }
        let columns = table
            .columns
            .into_iter()
            .map(|def| {
                let id = def.id.unwrap_or_else(|| {
                    next_id += 1;
                    next_id - 1
                });
                StoredColumn { id, def }
            })
            .collect();
        for row in &table.rows {
            if !row.get("id").is_some_and(Value::is_i64) {
                return Err(SourceError::format(format!(
                    "table '{}' has a row without an integer id",
                    table.table_id
                )));
            }
        }
        stored.push(StoredTable {
            id: pos as i64 + 1,
            table_id: table.table_id,
            columns,
            rows: table.rows,
        });
    }
    Ok(stored)
}

// ═══════════════════════════════════════════════════════════════
//  Columnar views
// ═══════════════════════════════════════════════════════════════

pub(crate) fn tables_table(tables: &[StoredTable]) -> ColumnarTable {
    let mut out = ColumnarTable::new();
    out.insert("id".to_string(), tables.iter().map(|t| Value::from(t.id)).collect());
    out.insert(
        "tableId".to_string(),
        tables.iter().map(|t| Value::from(t.table_id.clone())).collect(),
    );
    out
}

pub(crate) fn columns_table(tables: &[StoredTable]) -> Result<ColumnarTable, SourceError> {
    let keys = [
        "id",
        "parentId",
        "parentPos",
        "colId",
        "type",
        "label",
        "widgetOptions",
        "rules",
    ];
    let mut out: ColumnarTable = keys.iter().map(|k| (k.to_string(), Vec::new())).collect();
    let mut push = |key: &str, value: Value| {
        if let Some(values) = out.get_mut(key) {
            values.push(value);
        }
    };

    for table in tables {
        for (pos, column) in table.columns.iter().enumerate() {
            let def = &column.def;
            let widget_options = match &def.widget_options {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let rules = if def.rules.is_empty() {
                Value::Null
            } else {
                let mut encoded = vec![Value::from("L")];
                for helper in &def.rules {
                    let target = table
                        .columns
                        .iter()
                        .find(|c| &c.def.col_id == helper)
                        .ok_or_else(|| {
                            SourceError::format(format!(
                                "rule column '{helper}' not found in table '{}'",
                                table.table_id
                            ))
                        })?;
                    encoded.push(Value::from(target.id));
                }
                Value::Array(encoded)
            };

            push("id", Value::from(column.id));
            push("parentId", Value::from(table.id));
            push("parentPos", Value::from(pos as f64 + 1.0));
            push("colId", Value::from(def.col_id.clone()));
            push("type", Value::from(def.col_type.clone()));
            push("label", Value::from(def.label.clone().unwrap_or_default()));
            push("widgetOptions", Value::from(widget_options));
            push("rules", rules);
        }
    }
    Ok(out)
}

/// Rows in column-major form. Keys absent from a row read as null.
pub(crate) fn user_table(table: &StoredTable) -> ColumnarTable {
    let mut keys: Vec<String> = vec!["id".to_string()];
    for column in &table.columns {
        if !keys.contains(&column.def.col_id) {
            keys.push(column.def.col_id.clone());
        }
    }
    for row in &table.rows {
        for key in row.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }

    keys.into_iter()
        .map(|key| {
            let values = table
                .rows
                .iter()
                .map(|row| row.get(&key).cloned().unwrap_or(Value::Null))
                .collect();
            (key, values)
        })
        .collect()
}

pub(crate) fn row_cells(row: &Map<String, Value>) -> BTreeMap<String, Value> {
    row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
