use rowdrop_api::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("session closed")]
    SessionClosed,
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Source` variant, context is added to the inner `SourceError`.
    /// For other message variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Source(e) => EngineError::Source(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::TableNotFound(msg) => EngineError::TableNotFound(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

/// Template parse failure. Captured by the pipeline, never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at offset {offset})")]
pub struct TemplateError {
    pub message: String,
    pub offset: usize,
}

impl TemplateError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}
