pub mod config;
pub mod error;
pub mod record;
pub mod source;
pub mod surface;
pub mod wire;

pub use config::{ConfigIssue, ConfigStore, ListTemplateConfig, RenderConfig};
pub use error::{ErrorKind, SourceError};
pub use record::RowRecord;
pub use source::{AccessToken, ColumnarTable, SourceFuture, TableSource, TokenOptions};
pub use surface::DisplaySurface;
pub use wire::WireTag;
