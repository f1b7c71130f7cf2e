//! Two-way sync between a code editor and the template column of a row.
//!
//! Edits are written back after a quiet period. The host then echoes the
//! written row back to us; that echo must not reset the editor.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use rowdrop_api::{RowRecord, TableSource};

use crate::scheduler::ScheduledTask;

#[derive(Debug, Default)]
struct EditorState {
    /// Bound row and the text it holds.
    row: Option<(i64, String)>,
    /// Row and text of our last write (or of the write we skipped).
    last_write: Option<(i64, String)>,
}

pub struct EditorSync {
    source: Arc<dyn TableSource>,
    table_id: String,
    column: String,
    debounce: Duration,
    state: Arc<Mutex<EditorState>>,
    commit: ScheduledTask,
}

impl EditorSync {
    pub fn new(
        source: Arc<dyn TableSource>,
        table_id: impl Into<String>,
        column: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            source,
            table_id: table_id.into(),
            column: column.into(),
            debounce,
            state: Arc::new(Mutex::new(EditorState::default())),
            commit: ScheduledTask::new("editor-commit"),
        }
    }

    /// Row pushed by the host. Returns the text to load into the editor, or
    /// `None` when the row is the echo of our own last write.
    pub fn on_record(&self, row: &RowRecord) -> Option<String> {
        let text = row
            .get(&self.column)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut state = lock(&self.state);
        let same_row = state.row.as_ref().is_some_and(|(id, _)| *id == row.id);
        let echo = same_row
            && state
                .last_write
                .as_ref()
                .is_some_and(|(id, written)| *id == row.id && *written == text);
        state.row = Some((row.id, text.clone()));
        if echo {
            tracing::trace!(row = row.id, "ignoring echo of own write");
            return None;
        }
        Some(text)
    }

    /// Editor content changed. Written back to the row bound at the time of
    /// the edit once edits pause for the debounce delay, unless it equals
    /// what that row already holds.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_edit(&mut self, text: impl Into<String>) {
        let text = text.into();
        let bound = lock(&self.state).row.clone();
        let Some((row_id, loaded)) = bound else {
            tracing::debug!("edit without a bound row, ignoring");
            self.commit.cancel();
            return;
        };
        let source = self.source.clone();
        let state = self.state.clone();
        let table_id = self.table_id.clone();
        let column = self.column.clone();

        self.commit.arm(self.debounce, async move {
            {
                let mut guard = lock(&state);
                let current = match &guard.row {
                    Some((id, current)) if *id == row_id => current.clone(),
                    _ => loaded,
                };
                guard.last_write = Some((row_id, text.clone()));
                if current == text {
                    return;
                }
            }

            let mut cells = BTreeMap::new();
            cells.insert(column, Value::String(text.clone()));
            match source.update_cells(&table_id, row_id, cells).await {
                Ok(()) => {
                    tracing::debug!(table = %table_id, row = row_id, "template written back");
                    let mut guard = lock(&state);
                    if let Some((id, current)) = guard.row.as_mut() {
                        if *id == row_id {
                            *current = text;
                        }
                    }
                }
                Err(e) => tracing::error!(table = %table_id, row = row_id, error = %e, "write-back failed"),
            }
        });
    }

    /// An edit is waiting for its debounce delay.
    pub fn is_pending(&self) -> bool {
        self.commit.is_armed()
    }
}

fn lock(state: &Mutex<EditorState>) -> MutexGuard<'_, EditorState> {
    match state.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("editor state lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
