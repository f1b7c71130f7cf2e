//! Raw cell → [`CellValue`].
//!
//! This is the only place that looks at encoded arrays. Everything downstream
//! (drop builder, templates) works on the decoded union.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use rowdrop_api::wire::WireTag;
use rowdrop_api::AccessToken;

use crate::cache::TableRef;
use crate::field::{FieldMetadata, FieldType};

/// Rendered in place of a reference column holding something else.
pub const NOT_A_REFERENCE: &str = "# ERROR_NOT_A_REFERENCE #";

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn from_json(raw: &Value) -> Option<Self> {
        let scalar = match raw {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64()?),
            },
            Value::String(s) => Scalar::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => return None,
        };
        Some(scalar)
    }
}

/// A decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Scalar(Scalar),
    List(Vec<CellValue>),
    Object(BTreeMap<String, CellValue>),
    Date(NaiveDate),
    DateTime {
        at: DateTime<Utc>,
        timezone: Option<String>,
    },
    Reference {
        table: TableRef,
        row_id: i64,
    },
    ReferenceList {
        table: TableRef,
        row_ids: Vec<i64>,
    },
    /// Download URLs.
    Attachments(Vec<String>),
    Choice(String),
    ChoiceList(Vec<String>),
    /// A reference column held a non-reference value.
    NotAReference,
    /// Pending, censored, error values and anything unrecognized.
    Opaque(Value),
}

/// Discriminant of [`CellValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Scalar,
    List,
    Object,
    Date,
    DateTime,
    Reference,
    ReferenceList,
    Attachments,
    Choice,
    ChoiceList,
    NotAReference,
    Opaque,
}

impl CellValue {
    pub fn kind(&self) -> CellKind {
        match self {
            CellValue::Scalar(_) => CellKind::Scalar,
            CellValue::List(_) => CellKind::List,
            CellValue::Object(_) => CellKind::Object,
            CellValue::Date(_) => CellKind::Date,
            CellValue::DateTime { .. } => CellKind::DateTime,
            CellValue::Reference { .. } => CellKind::Reference,
            CellValue::ReferenceList { .. } => CellKind::ReferenceList,
            CellValue::Attachments(_) => CellKind::Attachments,
            CellValue::Choice(_) => CellKind::Choice,
            CellValue::ChoiceList(_) => CellKind::ChoiceList,
            CellValue::NotAReference => CellKind::NotAReference,
            CellValue::Opaque(_) => CellKind::Opaque,
        }
    }
}

/// Decode one raw cell.
///
/// The value's own tag wins over the declared column type; the declared type
/// only refines untagged or list-tagged values. `field` is `None` inside
/// nested objects and lists.
pub fn decode_cell(raw: &Value, field: Option<&FieldMetadata>, token: &AccessToken) -> CellValue {
    let declared = field.map(|f| &f.field_type);

    if let (Some(FieldType::Attachments), Some(items)) = (declared, raw.as_array()) {
        let urls = items
            .iter()
            .skip(1)
            .map(|id| token.attachment_url(plain_text(id)))
            .collect();
        return CellValue::Attachments(urls);
    }

    let tagged = WireTag::split(raw);
    match tagged {
        Some((WireTag::Reference, payload)) => {
            return decode_reference(payload).unwrap_or(CellValue::NotAReference);
        }
        Some((WireTag::ReferenceList, payload)) => {
            return decode_reference_list(payload).unwrap_or(CellValue::NotAReference);
        }
        _ => {}
    }

    if let Some(FieldType::Ref(_)) = declared {
        return match raw {
            Value::Null => CellValue::Scalar(Scalar::Null),
            _ => CellValue::NotAReference,
        };
    }

    match tagged {
        Some((WireTag::List, items)) => match declared {
            Some(FieldType::ChoiceList) => {
                CellValue::ChoiceList(items.iter().map(plain_text).collect())
            }
            Some(FieldType::RefList(table)) => match row_ids(items) {
                Some(row_ids) => CellValue::ReferenceList {
                    table: TableRef::Name(table.clone()),
                    row_ids,
                },
                None => decode_list(items, token),
            },
            _ => decode_list(items, token),
        },
        Some((WireTag::Dict, payload)) => match payload.first().and_then(Value::as_object) {
            Some(map) => CellValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), decode_cell(v, None, token)))
                    .collect(),
            ),
            None => CellValue::Opaque(raw.clone()),
        },
        Some((WireTag::Date, payload)) => payload
            .first()
            .and_then(timestamp)
            .map(|at| CellValue::Date(at.date_naive()))
            .unwrap_or_else(|| CellValue::Opaque(raw.clone())),
        Some((WireTag::DateTime, payload)) => match payload.first().and_then(timestamp) {
            Some(at) => CellValue::DateTime {
                at,
                timezone: payload.get(1).and_then(Value::as_str).map(str::to_string),
            },
            None => CellValue::Opaque(raw.clone()),
        },
        Some(_) => CellValue::Opaque(raw.clone()),
        None => match (raw, declared) {
            (Value::String(label), Some(FieldType::Choice)) => CellValue::Choice(label.clone()),
            _ => Scalar::from_json(raw)
                .map(CellValue::Scalar)
                .unwrap_or_else(|| CellValue::Opaque(raw.clone())),
        },
    }
}

fn decode_list(items: &[Value], token: &AccessToken) -> CellValue {
    CellValue::List(items.iter().map(|item| decode_cell(item, None, token)).collect())
}

/// `[table, row_id]`
fn decode_reference(payload: &[Value]) -> Option<CellValue> {
    let table = table_ref(payload.first()?)?;
    let row_id = payload.get(1)?.as_i64()?;
    Some(CellValue::Reference { table, row_id })
}

/// `[table, [row_id, ...]]`
fn decode_reference_list(payload: &[Value]) -> Option<CellValue> {
    let table = table_ref(payload.first()?)?;
    let row_ids = match payload.get(1) {
        Some(Value::Array(ids)) => row_ids(ids)?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return None,
    };
    Some(CellValue::ReferenceList { table, row_ids })
}

fn table_ref(raw: &Value) -> Option<TableRef> {
    match raw {
        Value::String(name) => Some(TableRef::Name(name.clone())),
        Value::Number(n) => n.as_i64().map(TableRef::Id),
        _ => None,
    }
}

fn row_ids(items: &[Value]) -> Option<Vec<i64>> {
    items.iter().map(Value::as_i64).collect()
}

/// Epoch seconds (possibly fractional) → UTC instant.
fn timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    let secs = raw.as_f64()?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn plain_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> AccessToken {
        AccessToken {
            base_url: "https://h".to_string(),
            token: "t".to_string(),
        }
    }

    fn typed(field_type: FieldType) -> FieldMetadata {
        FieldMetadata::new(1, "col", field_type)
    }

    #[test]
    fn attachments_become_download_urls() {
        let field = typed(FieldType::Attachments);
        let decoded = decode_cell(&json!(["A", 7, 9]), Some(&field), &token());
        assert_eq!(
            decoded,
            CellValue::Attachments(vec![
                "https://h/attachments/7/download?auth=t".to_string(),
                "https://h/attachments/9/download?auth=t".to_string(),
            ])
        );
    }

    #[test]
    fn attachments_pass_through_non_arrays() {
        let field = typed(FieldType::Attachments);
        let decoded = decode_cell(&json!(null), Some(&field), &token());
        assert_eq!(decoded, CellValue::Scalar(Scalar::Null));
    }

    #[test]
    fn reference_tag_wins_over_declared_type() {
        let field = typed(FieldType::Text);
        let decoded = decode_cell(&json!(["R", "People", 1]), Some(&field), &token());
        assert_eq!(
            decoded,
            CellValue::Reference {
                table: TableRef::Name("People".to_string()),
                row_id: 1
            }
        );
    }

    #[test]
    fn reference_column_with_wrong_tag_is_sentinel() {
        let field = typed(FieldType::Ref("People".to_string()));
        assert_eq!(decode_cell(&json!(5), Some(&field), &token()), CellValue::NotAReference);
        assert_eq!(
            decode_cell(&json!(["L", 1]), Some(&field), &token()),
            CellValue::NotAReference
        );
        assert_eq!(
            decode_cell(&json!(null), Some(&field), &token()),
            CellValue::Scalar(Scalar::Null)
        );
    }

    #[test]
    fn reference_list_tag() {
        let decoded = decode_cell(&json!(["r", "Tags", [3, 1, 2]]), None, &token());
        assert_eq!(
            decoded,
            CellValue::ReferenceList {
                table: TableRef::Name("Tags".to_string()),
                row_ids: vec![3, 1, 2]
            }
        );
    }

    #[test]
    fn list_in_ref_list_column_uses_declared_table() {
        let field = typed(FieldType::RefList("Tags".to_string()));
        let decoded = decode_cell(&json!(["L", 2, 5]), Some(&field), &token());
        assert_eq!(
            decoded,
            CellValue::ReferenceList {
                table: TableRef::Name("Tags".to_string()),
                row_ids: vec![2, 5]
            }
        );
    }

    #[test]
    fn plain_list_decodes_elements() {
        let decoded = decode_cell(&json!(["L", 1, "a", ["d", 0]]), None, &token());
        assert_eq!(
            decoded,
            CellValue::List(vec![
                CellValue::Scalar(Scalar::Int(1)),
                CellValue::Scalar(Scalar::Text("a".to_string())),
                CellValue::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
            ])
        );
    }

    #[test]
    fn choice_columns() {
        let choice = typed(FieldType::Choice);
        assert_eq!(
            decode_cell(&json!("High"), Some(&choice), &token()),
            CellValue::Choice("High".to_string())
        );

        let choices = typed(FieldType::ChoiceList);
        assert_eq!(
            decode_cell(&json!(["L", "a", "b"]), Some(&choices), &token()),
            CellValue::ChoiceList(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn dates_and_datetimes() {
        assert_eq!(
            decode_cell(&json!(["d", 1704067200]), None, &token()),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );

        let decoded = decode_cell(&json!(["D", 1704110400.5, "UTC"]), None, &token());
        let CellValue::DateTime { at, timezone } = decoded else {
            panic!("expected datetime, got {decoded:?}");
        };
        assert_eq!(at.timestamp(), 1704110400);
        assert_eq!(at.timestamp_subsec_millis(), 500);
        assert_eq!(timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn nested_object() {
        let decoded = decode_cell(&json!(["O", {"a": 1, "r": ["R", "People", 2]}]), None, &token());
        let CellValue::Object(map) = decoded else {
            panic!("expected object");
        };
        assert_eq!(map["a"], CellValue::Scalar(Scalar::Int(1)));
        assert_eq!(map["r"].kind(), CellKind::Reference);
    }

    #[test]
    fn unknown_and_malformed_are_opaque() {
        assert_eq!(decode_cell(&json!(["P"]), None, &token()).kind(), CellKind::Opaque);
        assert_eq!(
            decode_cell(&json!(["E", "TypeError", "boom"]), None, &token()).kind(),
            CellKind::Opaque
        );
        assert_eq!(decode_cell(&json!(["d", "soon"]), None, &token()).kind(), CellKind::Opaque);
        assert_eq!(decode_cell(&json!([1, 2]), None, &token()).kind(), CellKind::Opaque);
        assert_eq!(decode_cell(&json!({"a": 1}), None, &token()).kind(), CellKind::Opaque);
    }
}
