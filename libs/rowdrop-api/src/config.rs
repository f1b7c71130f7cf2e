use serde::{Deserialize, Serialize};

use crate::source::SourceFuture;

/// Widget options persisted by the host.
///
/// Column ids are the host's numeric column ids, not column keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Column of the bound table holding the template (or a reference to it).
    #[serde(default)]
    pub template_column_id: Option<i64>,
    /// When the template column is a reference: column of the referenced
    /// table holding the template text.
    #[serde(default)]
    pub template_ref_column_id: Option<i64>,
    /// Shared-template mode over a batch of rows.
    #[serde(default)]
    pub list: Option<ListTemplateConfig>,
}

/// One template shared by every row of a batch, picked by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTemplateConfig {
    /// Table holding candidate templates.
    pub table_id: String,
    /// Column holding the template text.
    pub template_column_id: i64,
    /// Column identifying a candidate.
    pub label_column_id: i64,
    /// Label of the template to use.
    pub label: String,
}

/// Why a configuration cannot drive rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// No template column chosen yet.
    MissingTemplateColumn,
    /// List mode with an empty table id or label.
    IncompleteList(&'static str),
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigIssue::MissingTemplateColumn => write!(f, "no template column selected"),
            ConfigIssue::IncompleteList(what) => write!(f, "list template has no {what}"),
        }
    }
}

impl RenderConfig {
    pub fn single(template_column_id: i64) -> Self {
        Self {
            template_column_id: Some(template_column_id),
            ..Self::default()
        }
    }

    pub fn is_list(&self) -> bool {
        self.list.is_some()
    }

    /// Check that the required selections are present.
    pub fn validate(&self) -> Result<(), ConfigIssue> {
        match &self.list {
            Some(list) => {
                if list.table_id.is_empty() {
                    return Err(ConfigIssue::IncompleteList("table"));
                }
                if list.label.is_empty() {
                    return Err(ConfigIssue::IncompleteList("label"));
                }
                Ok(())
            }
            None if self.template_column_id.is_none() => Err(ConfigIssue::MissingTemplateColumn),
            None => Ok(()),
        }
    }
}

/// Options persistence offered by the host.
///
/// Change notifications are not part of this trait: the host forwards them to
/// the render session as events.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> SourceFuture<'_, Option<RenderConfig>>;

    fn persist(&self, config: RenderConfig) -> SourceFuture<'_, ()>;
}
