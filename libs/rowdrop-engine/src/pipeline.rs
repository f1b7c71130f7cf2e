use rowdrop_api::DisplaySurface;

use crate::drops::Value;
use crate::error::{EngineError, TemplateError};
use crate::template::TemplateEngine;

pub const UNCONFIGURED_MARKUP: &str = "<p>Please select the template column</p>";
pub const WAITING_MARKUP: &str = "<p>Waiting for data or template</p>";

pub fn template_error_markup(message: &str) -> String {
    format!("<p style=\"color:red;\">Template Error: {message}</p>")
}

pub fn config_error_markup(message: &str) -> String {
    format!("<p style=\"color:red;\">Configuration Error: {message}</p>")
}

/// Where the pipeline stands after its last pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// No template column chosen.
    #[default]
    Unconfigured,
    /// The configuration can't be used as is.
    ConfigError(String),
    /// Configured, but no row or no template text yet.
    Waiting,
    /// Output computed (possibly an inline template error).
    Rendered,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Unconfigured => "unconfigured",
            PipelineState::ConfigError(_) => "config_error",
            PipelineState::Waiting => "waiting",
            PipelineState::Rendered => "rendered",
        }
    }
}

/// Last compiled source and what came out of compiling it.
struct TemplateState<C> {
    source: String,
    compiled: Result<C, TemplateError>,
}

/// Compile-once, paint-on-change rendering.
///
/// The pipeline keeps the last compiled source and the last painted markup,
/// so repeated passes with the same template and data cost one render and no
/// compile or paint.
pub struct RenderPipeline<E: TemplateEngine> {
    engine: E,
    template: Option<TemplateState<E::Compiled>>,
    state: PipelineState,
    output: Option<String>,
    painted: Option<String>,
    compiles: u64,
    paints: u64,
}

impl<E: TemplateEngine> RenderPipeline<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            template: None,
            state: PipelineState::Unconfigured,
            output: None,
            painted: None,
            compiles: 0,
            paints: 0,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Output of the last render, inline errors included.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn compile_count(&self) -> u64 {
        self.compiles
    }

    pub fn paint_count(&self) -> u64 {
        self.paints
    }

    /// Source of the current template, if any.
    pub fn source(&self) -> Option<&str> {
        self.template.as_ref().map(|t| t.source.as_str())
    }

    /// Install a template source. Compiles only when it differs from the
    /// current one; returns whether it did.
    pub fn update_source(&mut self, source: &str) -> bool {
        if self.template.as_ref().is_some_and(|t| t.source == source) {
            return false;
        }

        let compiled = self.engine.parse(source);
        self.compiles += 1;
        match &compiled {
            Ok(_) => tracing::debug!(len = source.len(), "template compiled"),
            Err(e) => tracing::debug!(error = %e, "template failed to compile"),
        }
        self.template = Some(TemplateState {
            source: source.to_string(),
            compiled,
        });
        true
    }

    /// Render the current template against `root`.
    ///
    /// A template that failed to compile renders its error inline. Without
    /// any template the result is the waiting placeholder.
    pub async fn render(&mut self, root: &Value) -> Result<String, EngineError> {
        let output = match &self.template {
            Some(TemplateState { compiled: Ok(compiled), .. }) => {
                self.engine.render(compiled, root).await?
            }
            Some(TemplateState { compiled: Err(e), .. }) => template_error_markup(&e.to_string()),
            None => {
                self.state = PipelineState::Waiting;
                return Ok(WAITING_MARKUP.to_string());
            }
        };
        self.state = PipelineState::Rendered;
        self.output = Some(output.clone());
        Ok(output)
    }

    /// Hand `markup` to the surface unless it is what the surface already shows.
    pub fn paint(&mut self, surface: &dyn DisplaySurface, markup: &str) -> bool {
        if self.painted.as_deref() == Some(markup) {
            tracing::trace!("output unchanged, skipping paint");
            return false;
        }
        surface.paint(markup);
        self.paints += 1;
        self.painted = Some(markup.to_string());
        true
    }

    /// Switch to a non-rendering state and paint its placeholder.
    pub fn show_placeholder(&mut self, surface: &dyn DisplaySurface, state: PipelineState) -> bool {
        let markup = match &state {
            PipelineState::Unconfigured => UNCONFIGURED_MARKUP.to_string(),
            PipelineState::ConfigError(msg) => config_error_markup(msg),
            PipelineState::Waiting | PipelineState::Rendered => WAITING_MARKUP.to_string(),
        };
        if self.state != state {
            tracing::debug!(state = state.name(), "pipeline state changed");
        }
        self.state = state;
        self.paint(surface, &markup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rowdrop_source_memory::MemorySurface;

    use crate::drops::{DictDrop, Field};
    use crate::template::Interpolator;

    fn root(name: &str) -> Value {
        Value::Dict(Arc::new(DictDrop::new(vec![("name".to_string(), Field::text(name))])))
    }

    #[tokio::test]
    async fn recompiles_only_on_source_change() {
        let mut pipeline = RenderPipeline::new(Interpolator);
        assert!(pipeline.update_source("Hi {{ name }}"));
        assert!(!pipeline.update_source("Hi {{ name }}"));
        assert_eq!(pipeline.compile_count(), 1);

        assert_eq!(pipeline.render(&root("Al")).await.unwrap(), "Hi Al");
        assert_eq!(pipeline.render(&root("Bo")).await.unwrap(), "Hi Bo");
        assert_eq!(pipeline.compile_count(), 1);

        assert!(pipeline.update_source("Bye {{ name }}"));
        assert_eq!(pipeline.compile_count(), 2);
        assert_eq!(pipeline.state(), &PipelineState::Rendered);
    }

    #[tokio::test]
    async fn repaints_only_on_output_change() {
        let surface = MemorySurface::new();
        let mut pipeline = RenderPipeline::new(Interpolator);
        pipeline.update_source("Hi {{ name }}");

        for name in ["Al", "Al", "Bo"] {
            let out = pipeline.render(&root(name)).await.unwrap();
            pipeline.paint(&surface, &out);
        }
        assert_eq!(pipeline.paint_count(), 2);
        assert_eq!(surface.paints(), ["Hi Al", "Hi Bo"]);
    }

    #[tokio::test]
    async fn compile_error_renders_inline_until_source_changes() {
        let mut pipeline = RenderPipeline::new(Interpolator);
        pipeline.update_source("Hi {{ name");

        let out = pipeline.render(&root("Al")).await.unwrap();
        assert!(out.starts_with("<p style=\"color:red;\">Template Error: "));
        assert!(out.contains("Error"));

        assert!(!pipeline.update_source("Hi {{ name"));
        assert_eq!(pipeline.compile_count(), 1);

        pipeline.update_source("Hi {{ name }}");
        assert_eq!(pipeline.render(&root("Al")).await.unwrap(), "Hi Al");
    }

    #[tokio::test]
    async fn no_template_means_waiting() {
        let mut pipeline = RenderPipeline::new(Interpolator);
        assert_eq!(pipeline.render(&root("Al")).await.unwrap(), WAITING_MARKUP);
        assert_eq!(pipeline.state(), &PipelineState::Waiting);
    }

    #[test]
    fn placeholders() {
        let surface = MemorySurface::new();
        let mut pipeline = RenderPipeline::new(Interpolator);

        assert!(pipeline.show_placeholder(&surface, PipelineState::Unconfigured));
        assert!(!pipeline.show_placeholder(&surface, PipelineState::Unconfigured));
        pipeline.show_placeholder(&surface, PipelineState::ConfigError("no column 9".to_string()));

        assert_eq!(
            surface.last().as_deref(),
            Some("<p style=\"color:red;\">Configuration Error: no column 9</p>")
        );
        assert_eq!(surface.paints().len(), 2);
    }
}
