//! Data-binding engine: decodes host rows into lazily resolved drops and
//! renders templates over them.

pub mod builder;
pub mod cache;
pub mod config;
pub mod decode;
pub mod drops;
pub mod editor;
pub mod error;
pub mod field;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod template;

pub use builder::{build_record_drop, DropContext};
pub use cache::{TableCache, TableDescriptor, TableIndex, TableRef, TableSnapshot};
pub use config::EngineSettings;
pub use decode::{decode_cell, CellKind, CellValue, NOT_A_REFERENCE};
pub use drops::{DictDrop, DropObject, Field, LazyRef, RecordDrop, Value, ValueDrop};
pub use editor::EditorSync;
pub use error::{EngineError, TemplateError};
pub use field::{FieldMetadata, FieldType, StyleOptions, WidgetOptions};
pub use pipeline::{PipelineState, RenderPipeline};
pub use scheduler::ScheduledTask;
pub use session::{Session, SessionEvent, SessionHandle};
pub use template::{Interpolator, TemplateEngine};
