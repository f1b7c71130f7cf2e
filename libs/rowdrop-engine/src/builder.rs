use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;

use rowdrop_api::{AccessToken, RowRecord};

use crate::cache::{TableCache, TableRef};
use crate::decode::{decode_cell, CellValue, Scalar, NOT_A_REFERENCE};
use crate::drops::{DictDrop, Field, FieldStyle, LazyRef, LazyTarget, RecordDrop, Value, ValueDrop};
use crate::error::EngineError;
use crate::field::{join_css, FieldMetadata};

/// Everything a drop needs to resolve references later: the session cache
/// and the attachment token.
#[derive(Clone)]
pub struct DropContext {
    cache: Arc<TableCache>,
    token: Arc<AccessToken>,
}

impl DropContext {
    pub fn new(cache: Arc<TableCache>, token: AccessToken) -> Self {
        Self {
            cache,
            token: Arc::new(token),
        }
    }

    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Build the drop of one row of `table`, `None` if the row doesn't exist.
    pub async fn load_row(
        &self,
        table: &TableRef,
        row_id: i64,
    ) -> Result<Option<Arc<RecordDrop>>, EngineError> {
        let snapshot = self.cache.get_table(table).await?;
        Ok(snapshot
            .row(row_id)
            .map(|row| Arc::new(build_record_drop(row, &snapshot.fields, self))))
    }

    /// Same as [`load_row`](Self::load_row) for several ids, order preserved.
    pub async fn load_rows(
        &self,
        table: &TableRef,
        row_ids: &[i64],
    ) -> Result<Vec<Option<Arc<RecordDrop>>>, EngineError> {
        let snapshot = self.cache.get_table(table).await?;
        Ok(row_ids
            .iter()
            .map(|&id| {
                snapshot
                    .row(id)
                    .map(|row| Arc::new(build_record_drop(row, &snapshot.fields, self)))
            })
            .collect())
    }
}

/// Styles of the column a value comes from, computed once per build.
struct Styling<'a> {
    field: &'a FieldMetadata,
    cell: &'a str,
    rule: String,
}

/// Decode a row into a [`RecordDrop`].
///
/// Properties follow the column order of `fields`; `id` comes first and
/// columns without metadata last. References become lazy accessors bound to
/// `ctx`; nothing is fetched here.
pub fn build_record_drop(row: &RowRecord, fields: &[FieldMetadata], ctx: &DropContext) -> RecordDrop {
    let mut styles = BTreeMap::new();
    let mut entries = Vec::with_capacity(row.cells.len());

    if let Some(id) = row.get("id") {
        entries.push(("id".to_string(), Field::Plain(json_value(id))));
    }

    for field in fields {
        let Some(raw) = row.get(&field.col_id) else {
            continue;
        };
        let style = FieldStyle {
            cell: field.cell_style(),
            header: field.header_style(),
        };
        let styling = Styling {
            field,
            cell: &style.cell,
            rule: field.rule_style(row),
        };
        let cell = decode_cell(raw, Some(field), ctx.token());
        entries.push((field.col_id.clone(), to_field(cell, Some(&styling), ctx)));
        styles.insert(field.col_id.clone(), style);
    }

    for (key, raw) in &row.cells {
        if key == "id" || fields.iter().any(|f| &f.col_id == key) {
            continue;
        }
        let cell = decode_cell(raw, None, ctx.token());
        entries.push((key.clone(), to_field(cell, None, ctx)));
    }

    RecordDrop::new(row.id, entries, styles)
}

fn to_field(cell: CellValue, styling: Option<&Styling<'_>>, ctx: &DropContext) -> Field {
    match cell {
        CellValue::Scalar(scalar) => {
            let value = scalar_value(scalar);
            match styling {
                Some(s) if s.field.field_type.reference_table().is_none() => {
                    styled(value, s.cell.to_string(), s.rule.clone())
                }
                _ => Field::Plain(value),
            }
        }
        CellValue::Choice(label) => choice(label, styling),
        CellValue::ChoiceList(labels) => Field::Plain(Value::List(
            labels.into_iter().map(|label| choice(label, styling)).collect(),
        )),
        CellValue::List(items) => Field::Plain(Value::List(
            items.into_iter().map(|item| to_field(item, None, ctx)).collect(),
        )),
        CellValue::Object(map) => {
            let fields = map
                .into_iter()
                .map(|(k, v)| (k, to_field(v, None, ctx)))
                .collect();
            Field::Plain(Value::Dict(Arc::new(DictDrop::new(fields))))
        }
        CellValue::Date(date) => Field::Plain(Value::Date(date)),
        CellValue::DateTime { at, .. } => Field::Plain(Value::DateTime(at)),
        CellValue::Reference { table, row_id } => {
            Field::Lazy(LazyRef::new(LazyTarget::Row { table, row_id }, ctx.clone()))
        }
        CellValue::ReferenceList { table, row_ids } => {
            Field::Lazy(LazyRef::new(LazyTarget::Rows { table, row_ids }, ctx.clone()))
        }
        CellValue::Attachments(urls) => {
            Field::Plain(Value::List(urls.into_iter().map(Field::text).collect()))
        }
        CellValue::NotAReference => Field::text(NOT_A_REFERENCE),
        CellValue::Opaque(raw) => Field::Plain(json_value(&raw)),
    }
}

fn choice(label: String, styling: Option<&Styling<'_>>) -> Field {
    match styling {
        Some(s) => {
            let style = join_css([s.cell, s.field.choice_style(&label).as_str()]);
            styled(Value::Text(label), style, s.rule.clone())
        }
        None => Field::Plain(Value::Text(label)),
    }
}

fn styled(value: Value, style: String, rule_style: String) -> Field {
    Field::Plain(Value::Styled(Arc::new(ValueDrop::new(value, style, rule_style))))
}

fn scalar_value(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(b),
        Scalar::Int(i) => Value::Int(i),
        Scalar::Float(f) => Value::Float(f),
        Scalar::Text(s) => Value::Text(s),
    }
}

/// Opaque values surface as scalars; compound ones as their JSON text.
fn json_value(raw: &Json) -> Value {
    match Scalar::from_json(raw) {
        Some(scalar) => scalar_value(scalar),
        None => Value::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowdrop_source_memory::MemorySource;
    use serde_json::json;

    use crate::drops::{DropObject, STYLES_PROPERTY};

    fn people() -> Arc<MemorySource> {
        let doc = json!({
            "baseUrl": "https://h",
            "token": "t",
            "selectedTable": "People",
            "tables": [
                {
                    "tableId": "People",
                    "columns": [
                        {"id": 1, "colId": "name", "type": "Text",
                         "widgetOptions": {"alignment": "center", "fontBold": true,
                                           "headerTextColor": "#333",
                                           "rulesOptions": [{"textColor": "#F00"}]},
                         "rules": ["gristHelper_ConditionalRule"]},
                        {"id": 2, "colId": "manager", "type": "Ref:People"},
                        {"id": 3, "colId": "reports", "type": "RefList:People"},
                        {"id": 4, "colId": "level", "type": "Choice",
                         "widgetOptions": {"choiceOptions": {"Senior": {"fillColor": "#0F0"}}}},
                        {"id": 5, "colId": "photos", "type": "Attachments"},
                        {"id": 6, "colId": "gristHelper_ConditionalRule", "type": "Bool"}
                    ],
                    "rows": [
                        {"id": 1, "name": "Al", "manager": ["R", "People", 0],
                         "reports": ["L", 2, 3, 42], "level": "Senior", "photos": null,
                         "gristHelper_ConditionalRule": true},
                        {"id": 2, "name": "Bo", "manager": ["R", "People", 1],
                         "reports": null, "level": "Junior", "photos": ["L", 7],
                         "gristHelper_ConditionalRule": false},
                        {"id": 3, "name": "Cy", "manager": 12,
                         "reports": null, "level": null, "photos": null,
                         "gristHelper_ConditionalRule": false}
                    ]
                }
            ]
        });
        Arc::new(MemorySource::from_value(doc).unwrap())
    }

    fn ctx(source: Arc<MemorySource>) -> DropContext {
        DropContext::new(
            Arc::new(TableCache::new(source)),
            AccessToken {
                base_url: "https://h".to_string(),
                token: "t".to_string(),
            },
        )
    }

    async fn record(ctx: &DropContext, id: i64) -> Arc<RecordDrop> {
        ctx.load_row(&"People".into(), id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn manager_reference_resolves_to_record() {
        let ctx = ctx(people());
        let bo = record(&ctx, 2).await;

        let manager = bo.property("manager").unwrap().resolve().await.unwrap();
        let manager = manager.as_record().unwrap();
        assert_eq!(manager.id(), 1);
        let name = manager.property("name").unwrap().resolve().await.unwrap();
        assert_eq!(name, "Al");
    }

    #[tokio::test]
    async fn reference_accessor_is_memoized() {
        let source = people();
        let ctx = ctx(source.clone());
        let bo = record(&ctx, 2).await;
        let accessor = bo.property("manager").unwrap();

        let first = accessor.resolve().await.unwrap();
        let second = bo.property("manager").unwrap().resolve().await.unwrap();
        assert!(Arc::ptr_eq(first.as_record().unwrap(), second.as_record().unwrap()));
        assert_eq!(source.fetch_count("People"), 1);
    }

    #[tokio::test]
    async fn missing_target_row_is_null() {
        let ctx = ctx(people());
        let al = record(&ctx, 1).await;
        let manager = al.property("manager").unwrap().resolve().await.unwrap();
        assert_eq!(manager, Value::Null);
    }

    #[tokio::test]
    async fn non_reference_value_is_sentinel() {
        let ctx = ctx(people());
        let cy = record(&ctx, 3).await;
        let manager = cy.property("manager").unwrap().resolve().await.unwrap();
        assert_eq!(manager, NOT_A_REFERENCE);
    }

    #[tokio::test]
    async fn reference_list_keeps_order_and_nulls() {
        let ctx = ctx(people());
        let al = record(&ctx, 1).await;
        let reports = al.property("reports").unwrap().resolve().await.unwrap();
        let items = reports.as_list().unwrap();
        assert_eq!(items.len(), 3);

        let ids: Vec<Option<i64>> = items
            .iter()
            .map(|f| match f {
                Field::Plain(Value::Record(r)) => Some(r.id()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, [Some(2), Some(3), None]);
    }

    #[tokio::test]
    async fn styles_and_rules() {
        let ctx = ctx(people());
        let al = record(&ctx, 1).await;

        let Some(Field::Plain(Value::Styled(name))) = al.property("name") else {
            panic!("name should be styled");
        };
        assert_eq!(name.style(), "text-align: center; font-weight: bold;");
        assert_eq!(name.rule_style(), "color: #F00;");
        assert_eq!(al.style("name").unwrap().header, "color: #333;");
        assert!(al.property(STYLES_PROPERTY).is_some());

        let bo = record(&ctx, 2).await;
        let Some(Field::Plain(Value::Styled(name))) = bo.property("name") else {
            panic!("name should be styled");
        };
        assert_eq!(name.rule_style(), "");
    }

    #[tokio::test]
    async fn choice_style_is_appended() {
        let ctx = ctx(people());
        let al = record(&ctx, 1).await;
        let Some(Field::Plain(Value::Styled(level))) = al.property("level") else {
            panic!("level should be styled");
        };
        assert_eq!(level.style(), "background-color: #0F0;");
        assert_eq!(level.value(), &Value::Text("Senior".to_string()));
    }

    #[tokio::test]
    async fn attachments_and_property_order() {
        let ctx = ctx(people());
        let bo = record(&ctx, 2).await;
        let photos = bo.property("photos").unwrap().resolve().await.unwrap();
        assert_eq!(photos.to_string(), "https://h/attachments/7/download?auth=t");
        assert_eq!(
            bo.property_names(),
            ["id", "name", "manager", "reports", "level", "photos"]
        );
    }

    fn tagged() -> Arc<MemorySource> {
        let doc = json!({
            "tables": [
                {
                    "tableId": "People",
                    "columns": [{"id": 1, "colId": "name", "type": "Text"}],
                    "rows": [{"id": 1, "name": "Al"}]
                },
                {
                    "tableId": "Cards",
                    "columns": [
                        {"id": 10, "colId": "tags", "type": "ChoiceList",
                         "widgetOptions": {"fontItalic": true,
                                           "choiceOptions": {"hot": {"textColor": "#F00"},
                                                             "cold": {"textColor": "#00F"}}}},
                        {"id": 11, "colId": "meta", "type": "Any"}
                    ],
                    "rows": [
                        {"id": 1, "tags": ["L", "hot", "cold", "plain"],
                         "meta": ["O", {"owner": ["R", "People", 1], "rank": 3}]}
                    ]
                }
            ]
        });
        Arc::new(MemorySource::from_value(doc).unwrap())
    }

    #[tokio::test]
    async fn choice_list_entries_are_styled_each() {
        let ctx = ctx(tagged());
        let card = ctx.load_row(&"Cards".into(), 1).await.unwrap().unwrap();
        let tags = card.property("tags").unwrap().resolve().await.unwrap();
        let tags = tags.as_list().unwrap();

        let styles: Vec<(String, String)> = tags
            .iter()
            .map(|f| match f {
                Field::Plain(Value::Styled(v)) => {
                    (v.value().as_str().unwrap_or_default().to_string(), v.style().to_string())
                }
                other => panic!("tag should be styled: {other:?}"),
            })
            .collect();
        assert_eq!(
            styles,
            [
                ("hot".to_string(), "font-style: italic; color: #F00;".to_string()),
                ("cold".to_string(), "font-style: italic; color: #00F;".to_string()),
                ("plain".to_string(), "font-style: italic;".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn references_inside_objects_resolve() {
        let source = tagged();
        let ctx = ctx(source.clone());
        let card = ctx.load_row(&"Cards".into(), 1).await.unwrap().unwrap();

        let meta = card.property("meta").unwrap().resolve().await.unwrap();
        assert!(matches!(meta, Value::Dict(_)));
        assert_eq!(meta.property("rank").unwrap().resolve().await.unwrap(), 3);

        let owner = meta.property("owner").unwrap();
        assert!(matches!(owner, Field::Lazy(_)));
        assert_eq!(source.fetch_count("People"), 0);
        let owner = owner.resolve().await.unwrap();
        let name = owner.property("name").unwrap().resolve().await.unwrap();
        assert_eq!(name, "Al");
        assert_eq!(source.fetch_count("People"), 1);
    }

    #[tokio::test]
    async fn decoding_twice_is_value_equal() {
        let source = people();
        let ctx = ctx(source);
        let snapshot = ctx.cache().get_table(&"People".into()).await.unwrap();
        let row = snapshot.row(2).unwrap();
        let first = build_record_drop(row, &snapshot.fields, &ctx);
        let second = build_record_drop(row, &snapshot.fields, &ctx);
        assert_eq!(first, second);
    }
}
