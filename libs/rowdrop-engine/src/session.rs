//! One view bound to a host document.
//!
//! A [`Session`] owns every piece of per-view state: configuration, bound
//! row(s), the table cache, the render pipeline and the refresh timer. Once
//! spawned it handles [`SessionEvent`]s one at a time, so at most one render
//! pass is in flight.

use std::sync::Arc;

use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rowdrop_api::{
    ConfigIssue, ConfigStore, DisplaySurface, ListTemplateConfig, RenderConfig, RowRecord,
    TableSource, TokenOptions,
};

use crate::builder::{build_record_drop, DropContext};
use crate::cache::{TableCache, TableRef, TableSnapshot};
use crate::config::EngineSettings;
use crate::decode::{decode_cell, CellValue, Scalar};
use crate::drops::{DictDrop, Field, Value};
use crate::error::EngineError;
use crate::field::FieldMetadata;
use crate::pipeline::{PipelineState, RenderPipeline};
use crate::scheduler::ScheduledTask;
use crate::template::{Interpolator, TemplateEngine};

/// Property of the list-mode root holding the bound rows.
pub const RECORDS_PROPERTY: &str = "records";

// ═══════════════════════════════════════════════════════════════
//  Events
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The host moved the cursor to (or updated) a row.
    Record(RowRecord),
    /// The host pushed the rows visible in the view.
    Records(Vec<RowRecord>),
    /// Options changed on the host side.
    Options(Option<RenderConfig>),
    /// The user picked a configuration; persisted when it differs.
    Configure(RenderConfig),
    /// Periodic refresh tick.
    Refresh,
    Shutdown,
}

/// Sending half of a spawned session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn send(&self, event: SessionEvent) -> Result<(), EngineError> {
        self.tx.send(event).await.map_err(|_| EngineError::SessionClosed)
    }

    pub async fn record(&self, row: RowRecord) -> Result<(), EngineError> {
        self.send(SessionEvent::Record(row)).await
    }

    pub async fn records(&self, rows: Vec<RowRecord>) -> Result<(), EngineError> {
        self.send(SessionEvent::Records(rows)).await
    }

    pub async fn options(&self, config: Option<RenderConfig>) -> Result<(), EngineError> {
        self.send(SessionEvent::Options(config)).await
    }

    pub async fn configure(&self, config: RenderConfig) -> Result<(), EngineError> {
        self.send(SessionEvent::Configure(config)).await
    }

    pub async fn refresh(&self) -> Result<(), EngineError> {
        self.send(SessionEvent::Refresh).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(SessionEvent::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════

/// What the view is currently showing data for.
#[derive(Debug, Clone, Default)]
enum Binding {
    #[default]
    Nothing,
    Row(RowRecord),
    Rows(Vec<RowRecord>),
}

impl Binding {
    /// The same rows, as they are in `snapshot` now. Vanished rows are dropped.
    fn reloaded(&self, snapshot: &TableSnapshot) -> Binding {
        match self {
            Binding::Nothing => Binding::Nothing,
            Binding::Row(row) => match snapshot.row(row.id) {
                Some(fresh) => Binding::Row(fresh.clone()),
                None => Binding::Nothing,
            },
            Binding::Rows(rows) => Binding::Rows(
                rows.iter()
                    .filter_map(|row| snapshot.row(row.id).cloned())
                    .collect(),
            ),
        }
    }
}

/// Outcome of looking up the template text.
enum TemplateSource {
    Text(String),
    /// Nothing to render yet.
    Missing,
    /// The configuration points at something that doesn't exist.
    Misconfigured(String),
}

pub struct Session<E: TemplateEngine = Interpolator> {
    source: Arc<dyn TableSource>,
    store: Arc<dyn ConfigStore>,
    surface: Arc<dyn DisplaySurface>,
    settings: EngineSettings,
    config: Option<RenderConfig>,
    cache: Arc<TableCache>,
    binding: Binding,
    pipeline: RenderPipeline<E>,
    refresh: ScheduledTask,
    events: Option<mpsc::WeakSender<SessionEvent>>,
    passes: u64,
}

impl Session<Interpolator> {
    pub fn new(
        source: Arc<dyn TableSource>,
        store: Arc<dyn ConfigStore>,
        surface: Arc<dyn DisplaySurface>,
        settings: EngineSettings,
    ) -> Self {
        Self::with_engine(source, store, surface, settings, Interpolator)
    }
}

impl<E: TemplateEngine + 'static> Session<E> {
    pub fn with_engine(
        source: Arc<dyn TableSource>,
        store: Arc<dyn ConfigStore>,
        surface: Arc<dyn DisplaySurface>,
        settings: EngineSettings,
        engine: E,
    ) -> Self {
        Self {
            cache: Arc::new(TableCache::new(source.clone())),
            source,
            store,
            surface,
            settings,
            config: None,
            binding: Binding::Nothing,
            pipeline: RenderPipeline::new(engine),
            refresh: ScheduledTask::new("refresh"),
            events: None,
            passes: 0,
        }
    }

    pub fn state(&self) -> &PipelineState {
        self.pipeline.state()
    }

    pub fn config(&self) -> Option<&RenderConfig> {
        self.config.as_ref()
    }

    pub fn pipeline(&self) -> &RenderPipeline<E> {
        &self.pipeline
    }

    /// Cache used by the last pass.
    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    /// Completed render passes, failed ones included.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn refresh_armed(&self) -> bool {
        self.refresh.is_armed()
    }

    /// Run the session on its own task.
    pub fn spawn(mut self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer);
        self.events = Some(tx.downgrade());
        let task = tokio::spawn(self.run(rx));
        (SessionHandle { tx }, task)
    }

    /// Stored options are loaded up front, but nothing is painted until the
    /// first event arrives.
    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>) {
        match self.store.load().await {
            Ok(config) => self.config = config,
            Err(e) => tracing::error!(error = %e, "failed to load stored options"),
        }

        while let Some(event) = rx.recv().await {
            if let SessionEvent::Shutdown = event {
                break;
            }
            self.handle(event).await;
        }

        self.refresh.cancel();
        tracing::debug!(passes = self.passes, "session stopped");
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Record(row) => {
                tracing::debug!(row = row.id, "record received");
                self.binding = Binding::Row(row);
                self.render_pass(false).await;
            }
            SessionEvent::Records(rows) => {
                tracing::debug!(rows = rows.len(), "records received");
                self.binding = Binding::Rows(rows);
                self.render_pass(false).await;
            }
            SessionEvent::Options(config) => self.apply_options(config).await,
            SessionEvent::Configure(config) => {
                if let Err(e) = self.configure(config).await {
                    tracing::error!(error = %e, "configuration rejected");
                }
            }
            SessionEvent::Refresh => self.render_pass(true).await,
            SessionEvent::Shutdown => {
                self.refresh.cancel();
            }
        }
    }

    /// Validate, persist when changed, apply.
    pub async fn configure(&mut self, config: RenderConfig) -> Result<(), EngineError> {
        config
            .validate()
            .map_err(|issue| EngineError::Config(issue.to_string()))?;
        if self.config.as_ref() != Some(&config) {
            self.store
                .persist(config.clone())
                .await
                .map_err(|e| EngineError::Source(e.with_context("persist options")))?;
            tracing::info!("options persisted");
        }
        self.apply_options(Some(config)).await;
        Ok(())
    }

    /// Replace the configuration and start over with a fresh cache.
    pub async fn apply_options(&mut self, config: Option<RenderConfig>) {
        self.refresh.cancel();
        self.cache = Arc::new(TableCache::new(self.source.clone()));
        self.config = config;
        self.render_pass(false).await;
    }

    /// One full pass. Errors keep the last painted output.
    ///
    /// With `reload`, bound rows are re-read from the fresh snapshot first.
    pub async fn render_pass(&mut self, reload: bool) {
        if let Err(e) = self.try_render(reload).await {
            tracing::error!(error = %e, "render pass failed");
        }
        self.passes += 1;
        self.arm_refresh();
    }

    async fn try_render(&mut self, reload: bool) -> Result<(), EngineError> {
        self.cache = Arc::new(TableCache::new(self.source.clone()));

        let Some(config) = self.config.clone() else {
            self.placeholder(PipelineState::Unconfigured);
            return Ok(());
        };
        match config.validate() {
            Ok(()) => {}
            Err(ConfigIssue::MissingTemplateColumn) => {
                self.placeholder(PipelineState::Unconfigured);
                return Ok(());
            }
            Err(issue) => {
                self.placeholder(PipelineState::ConfigError(issue.to_string()));
                return Ok(());
            }
        }

        let token = self
            .source
            .access_token(TokenOptions {
                read_only: self.settings.read_only_token,
            })
            .await?;
        let table = TableRef::Name(self.source.selected_table_id().await?);
        let fields = self.cache.get_fields(&table).await?;

        if reload {
            let snapshot = self.cache.get_table(&table).await?;
            self.binding = self.binding.reloaded(&snapshot);
        }

        let ctx = DropContext::new(self.cache.clone(), token);
        let (source, root) = match &config.list {
            Some(list) => {
                let Binding::Rows(rows) = &self.binding else {
                    self.placeholder(PipelineState::Waiting);
                    return Ok(());
                };
                let source = list_template(&self.cache, list).await?;
                (source, list_root(rows, &fields, &ctx))
            }
            None => {
                let Binding::Row(row) = &self.binding else {
                    self.placeholder(PipelineState::Waiting);
                    return Ok(());
                };
                let source = row_template(&self.cache, &config, row, &fields, &ctx).await?;
                let root = Value::Record(Arc::new(build_record_drop(row, &fields, &ctx)));
                (source, root)
            }
        };

        match source {
            TemplateSource::Text(text) => {
                self.pipeline.update_source(&text);
                let output = self.pipeline.render(&root).await?;
                if self.pipeline.paint(&*self.surface, &output) {
                    tracing::debug!(len = output.len(), "painted");
                }
            }
            TemplateSource::Missing => self.placeholder(PipelineState::Waiting),
            TemplateSource::Misconfigured(msg) => {
                tracing::warn!(error = %msg, "configuration does not match the document");
                self.placeholder(PipelineState::ConfigError(msg));
            }
        }
        Ok(())
    }

    fn placeholder(&mut self, state: PipelineState) {
        self.pipeline.show_placeholder(&*self.surface, state);
    }

    fn arm_refresh(&mut self) {
        if !self.settings.auto_refresh {
            return;
        }
        let Some(events) = self.events.clone() else {
            return;
        };
        self.refresh.arm(self.settings.refresh_interval(), async move {
            if let Some(tx) = events.upgrade() {
                if tx.send(SessionEvent::Refresh).await.is_err() {
                    tracing::trace!("session gone, dropping refresh tick");
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Template lookup
// ---------------------------------------------------------------------------

/// Template of the bound row: the template column's text, or when that
/// column holds a reference, the configured column of the referenced row.
async fn row_template(
    cache: &TableCache,
    config: &RenderConfig,
    row: &RowRecord,
    fields: &[FieldMetadata],
    ctx: &DropContext,
) -> Result<TemplateSource, EngineError> {
    let Some(column_id) = config.template_column_id else {
        return Ok(TemplateSource::Missing);
    };
    let Some(field) = fields.iter().find(|f| f.id == column_id) else {
        return Ok(TemplateSource::Misconfigured(format!(
            "template column {column_id} not found"
        )));
    };

    let raw = row.get(&field.col_id).unwrap_or(&Json::Null);
    match decode_cell(raw, Some(field), ctx.token()) {
        CellValue::Reference { table, row_id } => {
            let Some(ref_column) = config.template_ref_column_id else {
                return Ok(TemplateSource::Misconfigured(format!(
                    "column '{}' is a reference but no template column of {table} is selected",
                    field.col_id
                )));
            };
            let snapshot = cache.get_table(&table).await?;
            let Some(target) = snapshot.field(ref_column) else {
                return Ok(TemplateSource::Misconfigured(format!(
                    "template column {ref_column} not found in {table}"
                )));
            };
            Ok(snapshot
                .row(row_id)
                .and_then(|r| r.get(&target.col_id))
                .map(template_text)
                .unwrap_or(TemplateSource::Missing))
        }
        CellValue::Scalar(Scalar::Text(text)) => Ok(TemplateSource::Text(text)),
        _ => Ok(template_text(raw)),
    }
}

/// Shared template of list mode: the row of the template table whose label
/// column equals the configured label.
async fn list_template(
    cache: &TableCache,
    list: &ListTemplateConfig,
) -> Result<TemplateSource, EngineError> {
    let table = TableRef::Name(list.table_id.clone());
    let snapshot = match cache.get_table(&table).await {
        Ok(snapshot) => snapshot,
        Err(EngineError::TableNotFound(name)) => {
            return Ok(TemplateSource::Misconfigured(format!("table {name} not found")));
        }
        Err(e) => return Err(e),
    };
    let (Some(template), Some(label)) = (
        snapshot.field(list.template_column_id),
        snapshot.field(list.label_column_id),
    ) else {
        return Ok(TemplateSource::Misconfigured(format!(
            "template or label column not found in {}",
            list.table_id
        )));
    };

    let found = snapshot
        .rows()
        .find(|row| row.get(&label.col_id).and_then(Json::as_str) == Some(list.label.as_str()));
    Ok(match found {
        Some(row) => row
            .get(&template.col_id)
            .map(template_text)
            .unwrap_or(TemplateSource::Missing),
        None => TemplateSource::Misconfigured(format!(
            "no template labelled '{}' in {}",
            list.label, list.table_id
        )),
    })
}

fn template_text(raw: &Json) -> TemplateSource {
    match raw.as_str() {
        Some(text) => TemplateSource::Text(text.to_string()),
        None => TemplateSource::Missing,
    }
}

fn list_root(rows: &[RowRecord], fields: &[FieldMetadata], ctx: &DropContext) -> Value {
    let records = rows
        .iter()
        .map(|row| Field::Plain(Value::Record(Arc::new(build_record_drop(row, fields, ctx)))))
        .collect();
    Value::Dict(Arc::new(DictDrop::new(vec![(
        RECORDS_PROPERTY.to_string(),
        Field::Plain(Value::List(records)),
    )])))
}
