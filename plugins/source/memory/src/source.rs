use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::RwLock;

use rowdrop_api::wire::{COLUMNS_TABLE, TABLES_TABLE};
use rowdrop_api::{
    AccessToken, ColumnarTable, ConfigStore, RenderConfig, RowRecord, SourceError, SourceFuture,
    TableSource, TokenOptions,
};

use crate::document::{self, MemoryDocument, StoredTable};

/// A cell write received through [`TableSource::update_cells`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub table_id: String,
    pub row_id: i64,
    pub cells: BTreeMap<String, Value>,
}

/// Host document held in memory.
///
/// Serves user tables and the two metadata tables, stores widget options and
/// accepts cell writes. Counts fetches per table and can be told to fail
/// fetches, which is what the engine tests lean on.
pub struct MemorySource {
    base_url: String,
    token: String,
    selected_table: Mutex<String>,
    tables: RwLock<Vec<StoredTable>>,
    options: RwLock<Option<RenderConfig>>,
    fetches: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    writes: Mutex<Vec<CellWrite>>,
}

impl MemorySource {
    pub fn from_document(doc: MemoryDocument) -> Result<Self, SourceError> {
        let selected = match doc.selected_table {
            Some(table) => table,
            None => doc
                .tables
                .first()
                .map(|t| t.table_id.clone())
                .ok_or_else(|| SourceError::format("document has no tables"))?,
        };
        if !doc.tables.iter().any(|t| t.table_id == selected) {
            return Err(SourceError::not_found(format!("selected table '{selected}'")));
        }

        let tables = document::store(doc.tables)?;
        tracing::debug!(tables = tables.len(), selected = %selected, "memory document loaded");
        Ok(Self {
            base_url: doc.base_url,
            token: doc.token,
            selected_table: Mutex::new(selected),
            tables: RwLock::new(tables),
            options: RwLock::new(doc.options),
            fetches: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn from_value(value: Value) -> Result<Self, SourceError> {
        Self::from_document(serde_json::from_value(value)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SourceError> {
        Self::from_document(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SourceError::from(e).with_context(path.display()))?;
        Self::from_json(&text).map_err(|e| e.with_context(path.display()))
    }

    /// How many times `table_id` was requested.
    pub fn fetch_count(&self, table_id: &str) -> usize {
        lock(&self.fetches).get(table_id).copied().unwrap_or(0)
    }

    /// Make every later fetch of `table_id` fail with an I/O error.
    pub fn fail_table(&self, table_id: &str) {
        lock(&self.failing).insert(table_id.to_string());
    }

    pub fn heal_table(&self, table_id: &str) {
        lock(&self.failing).remove(table_id);
    }

    pub fn select_table(&self, table_id: &str) {
        *lock(&self.selected_table) = table_id.to_string();
    }

    pub fn selected_table(&self) -> String {
        lock(&self.selected_table).clone()
    }

    /// Every write received so far, oldest first.
    pub fn writes(&self) -> Vec<CellWrite> {
        lock(&self.writes).clone()
    }

    /// Current options, as persisted.
    pub async fn options(&self) -> Option<RenderConfig> {
        self.options.read().await.clone()
    }

    /// Replace one cell, as an edit made by another client would.
    pub async fn set_cell(
        &self,
        table_id: &str,
        row_id: i64,
        col_id: &str,
        value: Value,
    ) -> Result<(), SourceError> {
        let mut cells = BTreeMap::new();
        cells.insert(col_id.to_string(), value);
        self.apply(table_id, row_id, cells).await
    }

    /// One row of a user table, as the host pushes it to a view.
    pub async fn record(&self, table_id: &str, row_id: i64) -> Result<RowRecord, SourceError> {
        let tables = self.tables.read().await;
        let table = find(&tables, table_id)?;
        let row = table
            .rows
            .iter()
            .find(|r| r.get("id").and_then(Value::as_i64) == Some(row_id))
            .ok_or_else(|| SourceError::not_found(format!("row {row_id} of '{table_id}'")))?;
        RowRecord::from_map(document::row_cells(row))
    }

    /// Every row of a user table, in stored order.
    pub async fn records(&self, table_id: &str) -> Result<Vec<RowRecord>, SourceError> {
        let tables = self.tables.read().await;
        let table = find(&tables, table_id)?;
        table
            .rows
            .iter()
            .map(|row| RowRecord::from_map(document::row_cells(row)))
            .collect()
    }

    async fn apply(
        &self,
        table_id: &str,
        row_id: i64,
        cells: BTreeMap<String, Value>,
    ) -> Result<(), SourceError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .iter_mut()
            .find(|t| t.table_id == table_id)
            .ok_or_else(|| SourceError::not_found(format!("table '{table_id}'")))?;
        let row = table
            .rows
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_i64) == Some(row_id))
            .ok_or_else(|| SourceError::not_found(format!("row {row_id} of '{table_id}'")))?;
        for (key, value) in cells {
            if key == "id" {
                return Err(SourceError::denied("row ids are read-only"));
            }
            row.insert(key, value);
        }
        Ok(())
    }
}

impl TableSource for MemorySource {
    fn fetch_table(&self, table_id: &str) -> SourceFuture<'_, ColumnarTable> {
        let table_id = table_id.to_string();
        Box::pin(async move {
            *lock(&self.fetches).entry(table_id.clone()).or_insert(0) += 1;
            if lock(&self.failing).contains(&table_id) {
                return Err(SourceError::io("simulated fetch failure"));
            }

            let tables = self.tables.read().await;
            let raw = match table_id.as_str() {
                TABLES_TABLE => document::tables_table(&tables),
                COLUMNS_TABLE => document::columns_table(&tables)?,
                other => document::user_table(find(&tables, other)?),
            };
            tracing::trace!(table = %table_id, "served table");
            Ok(raw)
        })
    }

    fn access_token(&self, _options: TokenOptions) -> SourceFuture<'_, AccessToken> {
        let token = AccessToken {
            base_url: self.base_url.clone(),
            token: self.token.clone(),
        };
        Box::pin(async move { Ok(token) })
    }

    fn selected_table_id(&self) -> SourceFuture<'_, String> {
        let selected = self.selected_table();
        Box::pin(async move { Ok(selected) })
    }

    fn update_cells(
        &self,
        table_id: &str,
        row_id: i64,
        cells: BTreeMap<String, Value>,
    ) -> SourceFuture<'_, ()> {
        let table_id = table_id.to_string();
        Box::pin(async move {
            self.apply(&table_id, row_id, cells.clone()).await?;
            lock(&self.writes).push(CellWrite {
                table_id,
                row_id,
                cells,
            });
            Ok(())
        })
    }
}

impl ConfigStore for MemorySource {
    fn load(&self) -> SourceFuture<'_, Option<RenderConfig>> {
        Box::pin(async move { Ok(self.options.read().await.clone()) })
    }

    fn persist(&self, config: RenderConfig) -> SourceFuture<'_, ()> {
        Box::pin(async move {
            *self.options.write().await = Some(config);
            Ok(())
        })
    }
}

fn find<'a>(tables: &'a [StoredTable], table_id: &str) -> Result<&'a StoredTable, SourceError> {
    tables
        .iter()
        .find(|t| t.table_id == table_id)
        .ok_or_else(|| SourceError::not_found(format!("table '{table_id}'")))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory source lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
