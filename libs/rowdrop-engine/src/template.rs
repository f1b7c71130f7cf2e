//! Template engine seam and the bundled interpolator.
//!
//! The drop graph is lazy, so rendering is async: walking a path awaits every
//! reference accessor it crosses.

use std::future::Future;
use std::pin::Pin;

use crate::drops::{Field, Value};
use crate::error::{EngineError, TemplateError};

pub type RenderFuture<'a> = Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + 'a>>;

/// Parse and render capability of a template language.
pub trait TemplateEngine: Send + Sync {
    type Compiled: Send + Sync;

    fn parse(&self, source: &str) -> Result<Self::Compiled, TemplateError>;

    fn render<'a>(&'a self, compiled: &'a Self::Compiled, root: &'a Value) -> RenderFuture<'a>;
}

// ═══════════════════════════════════════════════════════════════
//  Drop traversal
// ═══════════════════════════════════════════════════════════════

/// Follow a property path from `root`, resolving lazy accessors on the way.
///
/// Unknown properties yield `Null` rather than an error.
pub async fn lookup<S: AsRef<str>>(root: &Value, path: &[S]) -> Result<Value, EngineError> {
    let mut current = root.clone();
    for key in path {
        let Some(field) = current.property(key.as_ref()) else {
            return Ok(Value::Null);
        };
        current = field.resolve().await?;
    }
    Ok(current)
}

/// Text form of a value, resolving lazy list elements first.
pub fn stringify(value: Value) -> RenderFuture<'static> {
    Box::pin(async move {
        match value {
            Value::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    let resolved = match item {
                        Field::Plain(value) => value,
                        Field::Lazy(lazy) => lazy.resolve().await?,
                    };
                    parts.push(stringify(resolved).await?);
                }
                Ok(parts.join(", "))
            }
            other => Ok(other.to_string()),
        }
    })
}

// ═══════════════════════════════════════════════════════════════
//  Interpolator
// ═══════════════════════════════════════════════════════════════

/// Minimal engine: literal text with `{{ path }}` substitutions.
///
/// A path is dot-separated property names or list indexes, e.g.
/// `{{ manager.name }}` or `{{ reports.0.name }}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpolator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Path(Vec<String>),
}

impl CompiledTemplate {
    /// Every path the template reads, in order of appearance.
    pub fn paths(&self) -> impl Iterator<Item = &[String]> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Path(path) => Some(path.as_slice()),
            Segment::Text(_) => None,
        })
    }
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

impl TemplateEngine for Interpolator {
    type Compiled = CompiledTemplate;

    fn parse(&self, source: &str) -> Result<CompiledTemplate, TemplateError> {
        let mut segments = Vec::new();
        let mut pos = 0;

        while let Some(rel) = source[pos..].find(OPEN) {
            let open = pos + rel;
            if open > pos {
                segments.push(Segment::Text(source[pos..open].to_string()));
            }
            let body_start = open + OPEN.len();
            let Some(len) = source[body_start..].find(CLOSE) else {
                return Err(TemplateError::new("unclosed tag '{{'", open));
            };
            let body = &source[body_start..body_start + len];
            segments.push(Segment::Path(parse_path(body, body_start)?));
            pos = body_start + len + CLOSE.len();
        }

        if pos < source.len() {
            segments.push(Segment::Text(source[pos..].to_string()));
        }
        Ok(CompiledTemplate { segments })
    }

    fn render<'a>(&'a self, compiled: &'a CompiledTemplate, root: &'a Value) -> RenderFuture<'a> {
        Box::pin(async move {
            let mut out = String::new();
            for segment in &compiled.segments {
                match segment {
                    Segment::Text(text) => out.push_str(text),
                    Segment::Path(path) => {
                        let value = lookup(root, path.as_slice()).await?;
                        out.push_str(&stringify(value).await?);
                    }
                }
            }
            Ok(out)
        })
    }
}

fn parse_path(body: &str, offset: usize) -> Result<Vec<String>, TemplateError> {
    let expr = body.trim();
    if expr.is_empty() {
        return Err(TemplateError::new("empty expression", offset));
    }
    let expr_offset = offset + (body.len() - body.trim_start().len());

    if let Some((i, c)) = expr
        .char_indices()
        .find(|&(_, c)| !(c.is_alphanumeric() || c == '_' || c == '.'))
    {
        return Err(TemplateError::new(format!("unexpected character '{c}'"), expr_offset + i));
    }

    let mut path = Vec::new();
    let mut start = 0;
    for part in expr.split('.') {
        if part.is_empty() {
            return Err(TemplateError::new("empty path segment", expr_offset + start));
        }
        path.push(part.to_string());
        start += part.len() + 1;
    }
    Ok(path)
}
