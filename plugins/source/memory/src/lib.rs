//! In-memory host: table source, option store and display surface backed by
//! a single JSON document.

mod document;
mod source;
mod surface;

pub use document::{ColumnDef, MemoryDocument, TableDef};
pub use source::{CellWrite, MemorySource};
pub use surface::MemorySurface;
