use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;

/// Boxed future returned by host traits.
///
/// The api crate does not depend on an async runtime; implementations pick one.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Table in column-major form: `column key -> values indexed by row position`.
///
/// Every table carries an `id` column holding the row ids.
pub type ColumnarTable = BTreeMap<String, Vec<Value>>;

/// Options for [`TableSource::access_token`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOptions {
    pub read_only: bool,
}

/// Short-lived credential used to build attachment download URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub base_url: String,
    pub token: String,
}

impl AccessToken {
    /// `{base_url}/attachments/{id}/download?auth={token}`
    pub fn attachment_url(&self, id: impl std::fmt::Display) -> String {
        format!("{}/attachments/{id}/download?auth={}", self.base_url, self.token)
    }
}

/// The host document, as seen by the renderer.
///
/// The engine doesn't know how tables travel; for the engine, the host is
/// just this trait.
pub trait TableSource: Send + Sync {
    /// Fetch a whole table by its symbolic id, reserved tables included.
    fn fetch_table(&self, table_id: &str) -> SourceFuture<'_, ColumnarTable>;

    /// Acquire a token for attachment downloads.
    fn access_token(&self, options: TokenOptions) -> SourceFuture<'_, AccessToken>;

    /// Symbolic id of the table bound to this view.
    fn selected_table_id(&self) -> SourceFuture<'_, String>;

    /// Write cells of one row back to the host.
    ///
    /// Default: returns error (source is read-only).
    fn update_cells(
        &self,
        table_id: &str,
        _row_id: i64,
        _cells: BTreeMap<String, Value>,
    ) -> SourceFuture<'_, ()> {
        let msg = format!("table '{table_id}' is read-only");
        Box::pin(async move { Err(SourceError::denied(msg)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_url_shape() {
        let token = AccessToken {
            base_url: "https://h".to_string(),
            token: "t".to_string(),
        };
        assert_eq!(token.attachment_url(7), "https://h/attachments/7/download?auth=t");
    }

    #[test]
    fn token_uses_camel_case() {
        let token: AccessToken =
            serde_json::from_str(r#"{"baseUrl":"https://h","token":"t"}"#).unwrap();
        assert_eq!(token.base_url, "https://h");
    }
}
