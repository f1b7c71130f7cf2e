use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use rowdrop_api::wire::{is_reserved_column, WireTag, COLUMNS_TABLE, MANUAL_SORT_TYPE, TABLES_TABLE};
use rowdrop_api::{ColumnarTable, RowRecord, SourceError, TableSource};

use crate::error::EngineError;
use crate::field::{FieldMetadata, FieldType, WidgetOptions};

// ═══════════════════════════════════════════════════════════════
//  Table identifiers
// ═══════════════════════════════════════════════════════════════

/// A table, named either by numeric id or by symbolic id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableRef {
    Id(i64),
    Name(String),
}

impl From<i64> for TableRef {
    fn from(id: i64) -> Self {
        TableRef::Id(id)
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::Name(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::Name(name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableRef::Id(id) => write!(f, "#{id}"),
            TableRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub id: i64,
    /// Symbolic id, used to fetch the table's rows.
    pub table_id: String,
}

/// Every user table of the document, keyed by numeric id.
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    tables: BTreeMap<i64, TableDescriptor>,
}

impl TableIndex {
    fn from_columnar(raw: &ColumnarTable) -> Result<Self, EngineError> {
        let ids = column(raw, "id", TABLES_TABLE)?;
        let names = column(raw, "tableId", TABLES_TABLE)?;
        let mut tables = BTreeMap::new();
        for (id, name) in ids.iter().zip(names) {
            let (Some(id), Some(name)) = (id.as_i64(), name.as_str()) else {
                continue;
            };
            tables.insert(
                id,
                TableDescriptor {
                    id,
                    table_id: name.to_string(),
                },
            );
        }
        Ok(Self { tables })
    }

    pub fn resolve(&self, table: &TableRef) -> Option<&TableDescriptor> {
        match table {
            TableRef::Id(id) => self.tables.get(id),
            TableRef::Name(name) => self.tables.values().find(|t| &t.table_id == name),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════
//  TableSnapshot
// ═══════════════════════════════════════════════════════════════

/// Rows of one table, fetched once per cache.
#[derive(Debug)]
pub struct TableSnapshot {
    pub table: TableDescriptor,
    pub fields: Arc<[FieldMetadata]>,
    rows: BTreeMap<i64, RowRecord>,
}

impl TableSnapshot {
    fn from_columnar(
        table: TableDescriptor,
        fields: Arc<[FieldMetadata]>,
        raw: &ColumnarTable,
    ) -> Result<Self, EngineError> {
        let ids = column(raw, "id", &table.table_id)?;
        let mut rows = BTreeMap::new();
        for (pos, id) in ids.iter().enumerate() {
            if id.as_i64().is_none() {
                tracing::warn!(table = %table.table_id, pos, "skipping row without integer id");
                continue;
            }
            let mut cells = BTreeMap::new();
            for (key, values) in raw {
                cells.insert(key.clone(), values.get(pos).cloned().unwrap_or(Value::Null));
            }
            let row = RowRecord::from_map(cells)
                .map_err(|e| EngineError::from(e).with_context(format!("table '{}'", table.table_id)))?;
            rows.insert(row.id, row);
        }
        Ok(Self { table, fields, rows })
    }

    pub fn row(&self, row_id: i64) -> Option<&RowRecord> {
        self.rows.get(&row_id)
    }

    /// Rows in id order.
    pub fn rows(&self) -> impl Iterator<Item = &RowRecord> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn field(&self, column_id: i64) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.id == column_id)
    }
}

// ═══════════════════════════════════════════════════════════════
//  TableCache
// ═══════════════════════════════════════════════════════════════

/// Memoizing view of the host document for one render session.
///
/// Append-only: once fetched, tables, fields and rows stay until the cache is
/// dropped. Concurrent fills of the same key are harmless; the first stored
/// value wins so every caller ends up sharing one instance.
pub struct TableCache {
    source: Arc<dyn TableSource>,
    tables: RwLock<Option<Arc<TableIndex>>>,
    columns: RwLock<Option<Arc<ColumnarTable>>>,
    fields: RwLock<HashMap<i64, Arc<[FieldMetadata]>>>,
    rows: RwLock<HashMap<i64, Arc<TableSnapshot>>>,
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("fields", &read(&self.fields).len())
            .field("rows", &read(&self.rows).len())
            .finish()
    }
}

impl TableCache {
    pub fn new(source: Arc<dyn TableSource>) -> Self {
        Self {
            source,
            tables: RwLock::new(None),
            columns: RwLock::new(None),
            fields: RwLock::new(HashMap::new()),
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn TableSource> {
        &self.source
    }

    /// All user tables of the document.
    pub async fn get_tables(&self) -> Result<Arc<TableIndex>, EngineError> {
        let cached = read(&self.tables).clone();
        if let Some(index) = cached {
            return Ok(index);
        }

        let raw = self.fetch(TABLES_TABLE).await?;
        let index = Arc::new(TableIndex::from_columnar(&raw)?);
        tracing::debug!(tables = index.len(), "fetched table index");

        let mut guard = write(&self.tables);
        Ok(guard.get_or_insert(index).clone())
    }

    /// Visible columns of a table, in display order.
    pub async fn get_fields(&self, table: &TableRef) -> Result<Arc<[FieldMetadata]>, EngineError> {
        let descriptor = self.resolve(table).await?;
        let cached = read(&self.fields).get(&descriptor.id).cloned();
        if let Some(fields) = cached {
            tracing::trace!(table = %descriptor.table_id, "fields cache hit");
            return Ok(fields);
        }

        let columns = self.get_columns().await?;
        let fields: Arc<[FieldMetadata]> = build_fields(&columns, descriptor.id)?.into();
        tracing::debug!(table = %descriptor.table_id, fields = fields.len(), "resolved fields");

        let mut guard = write(&self.fields);
        Ok(guard.entry(descriptor.id).or_insert(fields).clone())
    }

    /// Rows of a table, along with its fields.
    pub async fn get_table(&self, table: &TableRef) -> Result<Arc<TableSnapshot>, EngineError> {
        let descriptor = self.resolve(table).await?;
        let cached = read(&self.rows).get(&descriptor.id).cloned();
        if let Some(snapshot) = cached {
            tracing::trace!(table = %descriptor.table_id, "rows cache hit");
            return Ok(snapshot);
        }

        let fields = self.get_fields(&TableRef::Id(descriptor.id)).await?;
        let raw = self.fetch(&descriptor.table_id).await?;
        let snapshot = Arc::new(TableSnapshot::from_columnar(descriptor, fields, &raw)?);
        tracing::debug!(table = %snapshot.table.table_id, rows = snapshot.len(), "fetched rows");

        let mut guard = write(&self.rows);
        Ok(guard.entry(snapshot.table.id).or_insert(snapshot).clone())
    }

    async fn resolve(&self, table: &TableRef) -> Result<TableDescriptor, EngineError> {
        let index = self.get_tables().await?;
        index
            .resolve(table)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    async fn get_columns(&self) -> Result<Arc<ColumnarTable>, EngineError> {
        let cached = read(&self.columns).clone();
        if let Some(columns) = cached {
            return Ok(columns);
        }

        let raw = Arc::new(self.fetch(COLUMNS_TABLE).await?);
        let mut guard = write(&self.columns);
        Ok(guard.get_or_insert(raw).clone())
    }

    async fn fetch(&self, table_id: &str) -> Result<ColumnarTable, EngineError> {
        self.source
            .fetch_table(table_id)
            .await
            .map_err(|e| EngineError::Source(e.with_context(format!("fetch '{table_id}'"))))
    }
}

// ---------------------------------------------------------------------------
// Column metadata → FieldMetadata
// ---------------------------------------------------------------------------

fn build_fields(columns: &ColumnarTable, table_id: i64) -> Result<Vec<FieldMetadata>, EngineError> {
    let ids = column(columns, "id", COLUMNS_TABLE)?;
    let parents = column(columns, "parentId", COLUMNS_TABLE)?;
    let col_ids = column(columns, "colId", COLUMNS_TABLE)?;
    let types = column(columns, "type", COLUMNS_TABLE)?;
    let cell = |name: &str, pos: usize| columns.get(name).and_then(|values| values.get(pos));

    let positions: Vec<usize> = parents
        .iter()
        .enumerate()
        .filter(|(_, parent)| parent.as_i64() == Some(table_id))
        .map(|(pos, _)| pos)
        .collect();

    // Rule columns are helpers and get filtered below, so resolve them first.
    let keys_by_id: HashMap<i64, &str> = positions
        .iter()
        .filter_map(|&pos| Some((ids.get(pos)?.as_i64()?, col_ids.get(pos)?.as_str()?)))
        .collect();

    let mut fields = Vec::new();
    for &pos in &positions {
        let (Some(id), Some(col_id), Some(type_str)) = (
            ids.get(pos).and_then(Value::as_i64),
            col_ids.get(pos).and_then(Value::as_str),
            types.get(pos).and_then(Value::as_str),
        ) else {
            continue;
        };
        if type_str == MANUAL_SORT_TYPE || is_reserved_column(col_id) {
            continue;
        }

        let label = cell("label", pos)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(col_id)
            .to_string();
        let widget_options = match cell("widgetOptions", pos) {
            Some(Value::String(text)) => WidgetOptions::parse(text),
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        };
        let rule_columns = cell("rules", pos)
            .map(rule_ids)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| keys_by_id.get(&rule).map(|key| key.to_string()))
            .collect();

        fields.push((
            cell("parentPos", pos).and_then(Value::as_f64),
            FieldMetadata {
                id,
                parent_id: table_id,
                col_id: col_id.to_string(),
                label,
                field_type: FieldType::parse(type_str),
                widget_options,
                rule_columns,
            },
        ));
    }

    fields.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(fields.into_iter().map(|(_, field)| field).collect())
}

/// Rule references are stored as an encoded list of column ids.
fn rule_ids(raw: &Value) -> Vec<i64> {
    match WireTag::split(raw) {
        Some((WireTag::List, ids)) => ids.iter().filter_map(Value::as_i64).collect(),
        _ => Vec::new(),
    }
}

fn column<'a>(raw: &'a ColumnarTable, name: &str, table: &str) -> Result<&'a [Value], EngineError> {
    raw.get(name).map(Vec::as_slice).ok_or_else(|| {
        EngineError::Source(SourceError::format(format!("table '{table}' has no '{name}' column")))
    })
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("table cache read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("table cache write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowdrop_api::ErrorKind;
    use rowdrop_source_memory::MemorySource;
    use serde_json::json;

    fn source() -> Arc<MemorySource> {
        let doc = json!({
            "baseUrl": "https://h",
            "token": "t",
            "selectedTable": "People",
            "tables": [
                {
                    "tableId": "People",
                    "columns": [
                        {"id": 1, "colId": "name", "type": "Text", "label": "Name",
                         "widgetOptions": "{\"fontBold\": true}"},
                        {"id": 2, "colId": "manager", "type": "Ref:People",
                         "widgetOptions": "{broken"},
                        {"id": 3, "colId": "score", "type": "Numeric",
                         "widgetOptions": {"rulesOptions": [{"fillColor": "#F00"}]},
                         "rules": ["gristHelper_ConditionalRule"]},
                        {"id": 4, "colId": "gristHelper_ConditionalRule", "type": "Bool"},
                        {"id": 5, "colId": "manualSort", "type": "ManualSortPos"}
                    ],
                    "rows": [
                        {"id": 1, "name": "Al", "manager": null, "score": 1,
                         "gristHelper_ConditionalRule": false, "manualSort": 1},
                        {"id": 2, "name": "Bo", "manager": ["R", "People", 1], "score": 9,
                         "gristHelper_ConditionalRule": true, "manualSort": 2}
                    ]
                },
                {"tableId": "Tags", "columns": [{"id": 6, "colId": "label", "type": "Text"}], "rows": []}
            ]
        });
        Arc::new(MemorySource::from_value(doc).unwrap())
    }

    #[tokio::test]
    async fn fields_exclude_reserved_columns() {
        let cache = TableCache::new(source());
        let fields = cache.get_fields(&"People".into()).await.unwrap();
        let keys: Vec<_> = fields.iter().map(|f| f.col_id.as_str()).collect();
        assert_eq!(keys, ["name", "manager", "score"]);
        assert_eq!(fields[0].label, "Name");
        assert_eq!(fields[1].field_type, FieldType::Ref("People".to_string()));
    }

    #[tokio::test]
    async fn malformed_options_do_not_fail_lookup() {
        let cache = TableCache::new(source());
        let fields = cache.get_fields(&"People".into()).await.unwrap();
        assert!(fields[0].widget_options.is_some());
        assert!(fields[1].widget_options.is_none());
    }

    #[tokio::test]
    async fn rule_columns_resolved_before_filtering() {
        let cache = TableCache::new(source());
        let fields = cache.get_fields(&"People".into()).await.unwrap();
        assert_eq!(fields[2].rule_columns, ["gristHelper_ConditionalRule"]);
    }

    #[tokio::test]
    async fn fetches_are_memoized() {
        let src = source();
        let cache = TableCache::new(src.clone());

        let first = cache.get_table(&"People".into()).await.unwrap();
        let second = cache.get_table(&TableRef::Id(1)).await.unwrap();
        cache.get_fields(&"People".into()).await.unwrap();
        cache.get_fields(&"Tags".into()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(src.fetch_count("People"), 1);
        assert_eq!(src.fetch_count(TABLES_TABLE), 1);
        assert_eq!(src.fetch_count(COLUMNS_TABLE), 1);
        assert_eq!(src.fetch_count("Tags"), 0);
    }

    #[tokio::test]
    async fn snapshot_rows_split_reserved_cells() {
        let cache = TableCache::new(source());
        let snapshot = cache.get_table(&"People".into()).await.unwrap();
        let row = snapshot.row(2).unwrap();
        assert_eq!(row.get("name"), Some(&json!("Bo")));
        assert!(row.get("manualSort").is_none());
        assert!(row.get("gristHelper_ConditionalRule").is_none());
        assert_eq!(row.helper("gristHelper_ConditionalRule"), Some(&json!(true)));
        assert_eq!(snapshot.field(1).map(|f| f.col_id.as_str()), Some("name"));
    }

    #[tokio::test]
    async fn unknown_table_is_an_error() {
        let cache = TableCache::new(source());
        let err = cache.get_table(&"Nope".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::TableNotFound(name) if name == "Nope"));
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let src = source();
        src.fail_table("People");
        let cache = TableCache::new(src);
        let err = cache.get_table(&"People".into()).await.unwrap_err();
        match err {
            EngineError::Source(e) => {
                assert_eq!(e.kind, ErrorKind::Io);
                assert!(e.message.starts_with("fetch 'People'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
