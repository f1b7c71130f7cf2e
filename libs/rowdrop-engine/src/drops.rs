//! Template-facing projections of decoded rows.
//!
//! A drop is read-only. Properties are either plain values or lazy accessors
//! ([`LazyRef`]) that fetch a referenced row on first access and memoize it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tokio::sync::OnceCell;

use crate::builder::DropContext;
use crate::cache::TableRef;
use crate::error::EngineError;

/// Property name under which a record exposes its per-column styles.
pub const STYLES_PROPERTY: &str = "_styles";

/// Something a template can read named properties from.
pub trait DropObject: Send + Sync {
    fn property(&self, name: &str) -> Option<Field>;

    fn property_names(&self) -> Vec<String>;
}

// ═══════════════════════════════════════════════════════════════
//  Value / Field
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    List(Vec<Field>),
    Styled(Arc<ValueDrop>),
    Record(Arc<RecordDrop>),
    Dict(Arc<DictDrop>),
}

/// A property slot: a value, or an accessor resolved on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Plain(Value),
    Lazy(LazyRef),
}

impl Field {
    pub fn text(s: impl Into<String>) -> Self {
        Field::Plain(Value::Text(s.into()))
    }

    /// The value behind this slot, fetching it if needed.
    pub async fn resolve(&self) -> Result<Value, EngineError> {
        match self {
            Field::Plain(value) => Ok(value.clone()),
            Field::Lazy(lazy) => lazy.resolve().await,
        }
    }
}

impl Value {
    pub fn property(&self, name: &str) -> Option<Field> {
        match self {
            Value::Record(record) => record.property(name),
            Value::Dict(dict) => dict.property(name),
            Value::Styled(styled) => styled.property(name),
            Value::List(items) => match name {
                "size" => Some(Field::Plain(Value::Int(items.len() as i64))),
                "first" => items.first().cloned(),
                "last" => items.last().cloned(),
                index => index.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            },
            Value::Text(s) if name == "size" => Some(Field::Plain(Value::Int(s.chars().count() as i64))),
            _ => None,
        }
    }

    /// The underlying primitive of a styled value, the value itself otherwise.
    pub fn primitive(&self) -> &Value {
        match self {
            Value::Styled(styled) => styled.value(),
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.primitive(), Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.primitive() {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Arc<RecordDrop>> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Field]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        match self.primitive() {
            Value::Int(i) => i == other,
            Value::Float(f) => *f == *other as f64,
            _ => false,
        }
    }
}

/// Text form used when interpolating.
///
/// Lists show their already-resolved elements; unresolved lazy elements are
/// empty. Templates that need them resolve through the engine.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write_float(f, *x),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(at) => f.write_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Field::Plain(value) => write!(f, "{value}")?,
                        Field::Lazy(lazy) => {
                            if let Some(value) = lazy.peek() {
                                write!(f, "{value}")?;
                            }
                        }
                    }
                }
                Ok(())
            }
            Value::Styled(styled) => write!(f, "{}", styled.value()),
            Value::Record(record) => write!(f, "{}", record.id()),
            Value::Dict(_) => f.write_str("[object]"),
        }
    }
}

/// Integral floats print without a fractional part.
fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        write!(f, "{}", x as i64)
    } else {
        write!(f, "{x}")
    }
}

// ═══════════════════════════════════════════════════════════════
//  LazyRef
// ═══════════════════════════════════════════════════════════════

/// What a lazy accessor points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyTarget {
    Row { table: TableRef, row_id: i64 },
    Rows { table: TableRef, row_ids: Vec<i64> },
}

/// Reference accessor. Clones share one memo: the first successful
/// resolution is returned by every later call.
#[derive(Clone)]
pub struct LazyRef {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    target: LazyTarget,
    ctx: DropContext,
    resolved: OnceCell<Value>,
}

impl LazyRef {
    pub(crate) fn new(target: LazyTarget, ctx: DropContext) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                target,
                ctx,
                resolved: OnceCell::new(),
            }),
        }
    }

    pub fn target(&self) -> &LazyTarget {
        &self.inner.target
    }

    /// The memoized value, if already resolved.
    pub fn peek(&self) -> Option<&Value> {
        self.inner.resolved.get()
    }

    /// Resolve the reference: a `Record` (or `Null` for a missing row), or a
    /// `List` of those for reference lists. Fetch errors are not memoized.
    pub async fn resolve(&self) -> Result<Value, EngineError> {
        let value = self.inner.resolved.get_or_try_init(|| self.load()).await?;
        Ok(value.clone())
    }

    async fn load(&self) -> Result<Value, EngineError> {
        let ctx = &self.inner.ctx;
        match &self.inner.target {
            LazyTarget::Row { table, row_id } => {
                tracing::trace!(%table, row_id, "resolving reference");
                let record = ctx.load_row(table, *row_id).await?;
                Ok(record.map(Value::Record).unwrap_or(Value::Null))
            }
            LazyTarget::Rows { table, row_ids } => {
                tracing::trace!(%table, rows = row_ids.len(), "resolving reference list");
                let records = ctx.load_rows(table, row_ids).await?;
                Ok(Value::List(
                    records
                        .into_iter()
                        .map(|r| Field::Plain(r.map(Value::Record).unwrap_or(Value::Null)))
                        .collect(),
                ))
            }
        }
    }
}

impl PartialEq for LazyRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.target == other.inner.target
    }
}

impl fmt::Debug for LazyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("target", &self.inner.target)
            .field("resolved", &self.peek().is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  ValueDrop
// ═══════════════════════════════════════════════════════════════

/// A primitive with the style of its column.
///
/// Interpolates as the primitive; `value`, `style` and `rule_style` are
/// readable as properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDrop {
    value: Value,
    style: String,
    rule_style: String,
}

impl ValueDrop {
    pub fn new(value: Value, style: String, rule_style: String) -> Self {
        Self {
            value,
            style,
            rule_style,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Column style (plus choice style for choice values).
    pub fn style(&self) -> &str {
        &self.style
    }

    /// Style of the conditional rules active for this row.
    pub fn rule_style(&self) -> &str {
        &self.rule_style
    }
}

impl DropObject for ValueDrop {
    fn property(&self, name: &str) -> Option<Field> {
        match name {
            "value" => Some(Field::Plain(self.value.clone())),
            "style" => Some(Field::text(self.style.clone())),
            "rule_style" => Some(Field::text(self.rule_style.clone())),
            other => self.value.property(other),
        }
    }

    fn property_names(&self) -> Vec<String> {
        vec!["value".to_string(), "style".to_string(), "rule_style".to_string()]
    }
}

impl PartialEq<Value> for ValueDrop {
    fn eq(&self, other: &Value) -> bool {
        &self.value == other.primitive()
    }
}

impl fmt::Display for ValueDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// ═══════════════════════════════════════════════════════════════
//  DictDrop
// ═══════════════════════════════════════════════════════════════

/// Nested object, decoded like a record but without column metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DictDrop {
    fields: Vec<(String, Field)>,
}

impl DictDrop {
    pub fn new(fields: Vec<(String, Field)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, f)| f)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl DropObject for DictDrop {
    fn property(&self, name: &str) -> Option<Field> {
        self.get(name).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        self.fields.iter().map(|(k, _)| k.clone()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════
//  RecordDrop
// ═══════════════════════════════════════════════════════════════

/// Precomputed styles of one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStyle {
    pub cell: String,
    pub header: String,
}

/// One row, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDrop {
    id: i64,
    fields: Vec<(String, Field)>,
    styles: BTreeMap<String, FieldStyle>,
    styles_drop: Arc<DictDrop>,
}

impl RecordDrop {
    pub fn new(id: i64, fields: Vec<(String, Field)>, styles: BTreeMap<String, FieldStyle>) -> Self {
        let styles_drop = styles
            .iter()
            .map(|(col, style)| {
                let entry = DictDrop::new(vec![
                    ("cell".to_string(), Field::text(style.cell.clone())),
                    ("header".to_string(), Field::text(style.header.clone())),
                ]);
                (col.clone(), Field::Plain(Value::Dict(Arc::new(entry))))
            })
            .collect();
        Self {
            id,
            fields,
            styles,
            styles_drop: Arc::new(DictDrop::new(styles_drop)),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, f)| f)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, f)| (k.as_str(), f))
    }

    pub fn style(&self, col_id: &str) -> Option<&FieldStyle> {
        self.styles.get(col_id)
    }
}

impl DropObject for RecordDrop {
    fn property(&self, name: &str) -> Option<Field> {
        if name == STYLES_PROPERTY {
            return Some(Field::Plain(Value::Dict(self.styles_drop.clone())));
        }
        self.get(name).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        self.fields.iter().map(|(k, _)| k.clone()).collect()
    }
}
