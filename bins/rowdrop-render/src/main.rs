use std::io::Write;
use std::sync::Arc;

use clap::Parser;

use rowdrop_api::{DisplaySurface, RowRecord};
use rowdrop_engine::{EngineError, EngineSettings, Session, SessionHandle};
use rowdrop_source_memory::MemorySource;

#[derive(Parser)]
#[command(name = "rowdrop-render", about = "Render row templates from a JSON document")]
struct Cli {
    /// Path to the JSON document (tables, rows, options).
    #[arg(long, env = "ROWDROP_DOC")]
    doc: String,

    /// Path to TOML engine settings.
    #[arg(long, env = "ROWDROP_SETTINGS")]
    settings: Option<String>,

    /// Row of the selected table to bind (defaults to the first one).
    #[arg(long)]
    row: Option<i64>,

    /// Keep refreshing until Ctrl+C.
    #[arg(long)]
    watch: bool,
}

/// Prints every paint to stdout, one block per paint.
struct StdoutSurface;

impl DisplaySurface for StdoutSurface {
    fn paint(&self, markup: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{markup}").and_then(|()| out.flush()) {
            tracing::error!(error = %e, "failed to write output");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => {
            tracing::info!(settings = %path, "loading settings");
            match EngineSettings::load(path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load settings");
                    std::process::exit(1);
                }
            }
        }
        None => EngineSettings::default(),
    };
    if cli.watch {
        settings.auto_refresh = true;
    }

    tracing::info!(doc = %cli.doc, "loading document");
    let source = match MemorySource::load(&cli.doc) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to load document");
            std::process::exit(1);
        }
    };

    let session = Session::new(source.clone(), source.clone(), Arc::new(StdoutSurface), settings);
    let (handle, task) = session.spawn();

    if let Err(e) = bind(&handle, &source, cli.row).await {
        tracing::error!(error = %e, "failed to bind rows");
        std::process::exit(1);
    }

    if cli.watch {
        tracing::info!("watching, press Ctrl+C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
        tracing::info!("shutting down...");
    }

    if let Err(e) = handle.shutdown().await {
        tracing::warn!(error = %e, "session already stopped");
    }
    if let Err(e) = task.await {
        tracing::error!(error = %e, "session task failed");
        std::process::exit(1);
    }
}

/// Push the rows the view shows, the way a host would on startup.
async fn bind(handle: &SessionHandle, source: &MemorySource, row: Option<i64>) -> Result<(), EngineError> {
    let table = source.selected_table();
    let list_mode = source.options().await.is_some_and(|o| o.is_list());

    if list_mode {
        let rows = source.records(&table).await?;
        tracing::info!(table = %table, rows = rows.len(), "binding rows");
        return handle.records(rows).await;
    }

    let record: RowRecord = match row {
        Some(id) => source.record(&table, id).await?,
        None => source
            .records(&table)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Config(format!("table '{table}' has no rows")))?,
    };
    tracing::info!(table = %table, row = record.id, "binding row");
    handle.record(record).await
}
