use std::collections::BTreeMap;

use serde::Deserialize;

use rowdrop_api::wire::is_truthy;
use rowdrop_api::RowRecord;

// ═══════════════════════════════════════════════════════════════
//  FieldType
// ═══════════════════════════════════════════════════════════════

/// Declared column type, as found in the column metadata table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Any,
    Text,
    Numeric,
    Int,
    Bool,
    Date,
    /// `DateTime:<timezone>`
    DateTime(Option<String>),
    Choice,
    ChoiceList,
    /// `Ref:<table>`
    Ref(String),
    /// `RefList:<table>`
    RefList(String),
    Attachments,
    ManualSortPos,
    Other(String),
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        let (head, param) = match raw.split_once(':') {
            Some((head, param)) => (head, Some(param)),
            None => (raw, None),
        };
        match (head, param) {
            ("Any", None) => FieldType::Any,
            ("Text", None) => FieldType::Text,
            ("Numeric", None) => FieldType::Numeric,
            ("Int", None) => FieldType::Int,
            ("Bool", None) => FieldType::Bool,
            ("Date", None) => FieldType::Date,
            ("DateTime", tz) => FieldType::DateTime(tz.map(str::to_string)),
            ("Choice", None) => FieldType::Choice,
            ("ChoiceList", None) => FieldType::ChoiceList,
            ("Ref", Some(table)) => FieldType::Ref(table.to_string()),
            ("RefList", Some(table)) => FieldType::RefList(table.to_string()),
            ("Attachments", None) => FieldType::Attachments,
            ("ManualSortPos", None) => FieldType::ManualSortPos,
            _ => FieldType::Other(raw.to_string()),
        }
    }

    /// Target table of a declared reference column.
    pub fn reference_table(&self) -> Option<&str> {
        match self {
            FieldType::Ref(table) | FieldType::RefList(table) => Some(table),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Widget options
// ═══════════════════════════════════════════════════════════════

/// Display options of a cell (or of a choice, or of a conditional rule).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOptions {
    #[serde(default)]
    pub alignment: Option<String>,
    #[serde(default)]
    pub text_color: Option<String>,
    #[serde(default)]
    pub fill_color: Option<String>,
    #[serde(default)]
    pub font_bold: Option<bool>,
    #[serde(default)]
    pub font_underline: Option<bool>,
    #[serde(default)]
    pub font_italic: Option<bool>,
    #[serde(default)]
    pub font_strikethrough: Option<bool>,
}

/// Header variants of [`StyleOptions`], stored under `header*` keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderStyleOptions {
    #[serde(default)]
    pub header_alignment: Option<String>,
    #[serde(default)]
    pub header_text_color: Option<String>,
    #[serde(default)]
    pub header_fill_color: Option<String>,
    #[serde(default)]
    pub header_font_bold: Option<bool>,
    #[serde(default)]
    pub header_font_underline: Option<bool>,
    #[serde(default)]
    pub header_font_italic: Option<bool>,
    #[serde(default)]
    pub header_font_strikethrough: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetOptions {
    #[serde(flatten)]
    pub cell: StyleOptions,
    #[serde(flatten)]
    pub header: HeaderStyleOptions,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub choice_options: BTreeMap<String, StyleOptions>,
    /// One entry per conditional rule, same order as the rule columns.
    #[serde(default)]
    pub rules_options: Vec<StyleOptions>,
}

impl WidgetOptions {
    /// Parse options stored as text. Malformed text yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(options) => Some(options),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed widget options");
                None
            }
        }
    }
}

impl StyleOptions {
    /// Inline CSS of the options that are set, in a fixed order: alignment,
    /// text color, fill color, bold, underline, italic, strikethrough.
    ///
    /// Underline and strikethrough share one `text-decoration` declaration,
    /// emitted at the first of their positions.
    pub fn css(&self) -> String {
        let underline = self.font_underline == Some(true);
        let strikethrough = self.font_strikethrough == Some(true);
        let mut parts: Vec<String> = Vec::new();
        if let Some(align) = non_empty(&self.alignment) {
            parts.push(format!("text-align: {align};"));
        }
        if let Some(color) = non_empty(&self.text_color) {
            parts.push(format!("color: {color};"));
        }
        if let Some(color) = non_empty(&self.fill_color) {
            parts.push(format!("background-color: {color};"));
        }
        if self.font_bold == Some(true) {
            parts.push("font-weight: bold;".to_string());
        }
        if underline {
            let decoration = if strikethrough { "underline line-through" } else { "underline" };
            parts.push(format!("text-decoration: {decoration};"));
        }
        if self.font_italic == Some(true) {
            parts.push("font-style: italic;".to_string());
        }
        if strikethrough && !underline {
            parts.push("text-decoration: line-through;".to_string());
        }
        parts.join(" ")
    }
}

impl HeaderStyleOptions {
    pub fn as_style(&self) -> StyleOptions {
        StyleOptions {
            alignment: self.header_alignment.clone(),
            text_color: self.header_text_color.clone(),
            fill_color: self.header_fill_color.clone(),
            font_bold: self.header_font_bold,
            font_underline: self.header_font_underline,
            font_italic: self.header_font_italic,
            font_strikethrough: self.header_font_strikethrough,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Join non-empty CSS fragments with a single space.
pub(crate) fn join_css<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for part in parts {
        let part = part.as_ref();
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}

// ═══════════════════════════════════════════════════════════════
//  FieldMetadata
// ═══════════════════════════════════════════════════════════════

/// One visible column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    /// Numeric column id (the one persisted in widget options).
    pub id: i64,
    /// Numeric id of the owning table.
    pub parent_id: i64,
    /// Column key, as used in row data.
    pub col_id: String,
    pub label: String,
    pub field_type: FieldType,
    pub widget_options: Option<WidgetOptions>,
    /// Helper column keys of the conditional rules, resolved from column ids.
    pub rule_columns: Vec<String>,
}

impl FieldMetadata {
    pub fn new(id: i64, col_id: impl Into<String>, field_type: FieldType) -> Self {
        let col_id = col_id.into();
        Self {
            id,
            parent_id: 0,
            label: col_id.clone(),
            col_id,
            field_type,
            widget_options: None,
            rule_columns: Vec::new(),
        }
    }

    pub fn cell_style(&self) -> String {
        self.widget_options
            .as_ref()
            .map(|o| o.cell.css())
            .unwrap_or_default()
    }

    pub fn header_style(&self) -> String {
        self.widget_options
            .as_ref()
            .map(|o| o.header.as_style().css())
            .unwrap_or_default()
    }

    pub fn choice_style(&self, label: &str) -> String {
        self.widget_options
            .as_ref()
            .and_then(|o| o.choice_options.get(label))
            .map(StyleOptions::css)
            .unwrap_or_default()
    }

    /// Style of every conditional rule whose helper column is truthy in `row`.
    pub fn rule_style(&self, row: &RowRecord) -> String {
        let Some(options) = &self.widget_options else {
            return String::new();
        };
        let active = self
            .rule_columns
            .iter()
            .zip(&options.rules_options)
            .filter(|(col, _)| row.helper(col).is_some_and(is_truthy))
            .map(|(_, style)| style.css());
        join_css(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_parameterized_types() {
        assert_eq!(FieldType::parse("Ref:People"), FieldType::Ref("People".to_string()));
        assert_eq!(FieldType::parse("RefList:Tags"), FieldType::RefList("Tags".to_string()));
        assert_eq!(
            FieldType::parse("DateTime:Europe/Paris"),
            FieldType::DateTime(Some("Europe/Paris".to_string()))
        );
        assert_eq!(FieldType::parse("Text"), FieldType::Text);
        assert_eq!(FieldType::parse("Ref"), FieldType::Other("Ref".to_string()));
        assert_eq!(FieldType::parse("Ref:People").reference_table(), Some("People"));
    }

    #[test]
    fn css_follows_fixed_order() {
        let options = WidgetOptions::parse(
            r##"{"fontItalic": true, "fillColor": "#00FF00", "alignment": "right",
                 "fontBold": true, "textColor": "#FF0000", "fontUnderline": false,
                 "fontStrikethrough": true}"##,
        )
        .unwrap();
        assert_eq!(
            options.cell.css(),
            "text-align: right; color: #FF0000; background-color: #00FF00; \
             font-weight: bold; font-style: italic; text-decoration: line-through;"
        );
    }

    #[test]
    fn underline_and_strikethrough_combine() {
        let options = WidgetOptions::parse(
            r#"{"fontStrikethrough": true, "fontItalic": true, "fontUnderline": true}"#,
        )
        .unwrap();
        assert_eq!(
            options.cell.css(),
            "text-decoration: underline line-through; font-style: italic;"
        );
    }

    #[test]
    fn empty_options_are_skipped() {
        let options = WidgetOptions::parse(r#"{"textColor": "", "fontBold": false}"#).unwrap();
        assert_eq!(options.cell.css(), "");
    }

    #[test]
    fn header_variants() {
        let options =
            WidgetOptions::parse(r##"{"headerFillColor": "#EEE", "headerFontBold": true}"##)
                .unwrap();
        assert_eq!(options.header.as_style().css(), "background-color: #EEE; font-weight: bold;");
        assert_eq!(options.cell.css(), "");
    }

    #[test]
    fn malformed_options_are_absent() {
        assert_eq!(WidgetOptions::parse("{not json"), None);
        assert_eq!(WidgetOptions::parse(""), None);
        assert_eq!(WidgetOptions::parse(r#"{"fontBold": "yes"}"#), None);
    }

    #[test]
    fn active_rules_only() {
        let mut field = FieldMetadata::new(3, "score", FieldType::Numeric);
        field.widget_options = WidgetOptions::parse(
            r##"{"rulesOptions": [{"fillColor": "#F00"}, {"fontBold": true}]}"##,
        );
        field.rule_columns = vec![
            "gristHelper_ConditionalRule".to_string(),
            "gristHelper_ConditionalRule2".to_string(),
        ];

        let row = RowRecord::from_map(
            serde_json::from_value(json!({
                "id": 1,
                "score": 3,
                "gristHelper_ConditionalRule": false,
                "gristHelper_ConditionalRule2": true,
            }))
            .unwrap(),
        )
        .unwrap();
        assert_eq!(field.rule_style(&row), "font-weight: bold;");
    }
}
