//! Paged editing engine for very large XML documents.
//!
//! The crate keeps at most one page of a document in the editable window
//! and moves everything heavier — page indexing, whole-file search,
//! streaming reformatting, saves — through cancellable background tasks.
//! [`document::Document`] is the stateful entry point; the other modules
//! are stateless engines it composes.

pub mod config;
pub mod document;
pub mod error;
pub mod formatter;
pub mod lines;
pub mod pagination;
pub mod search;
pub mod tasks;
pub mod watcher;

pub use config::Settings;
pub use document::{DisplayMode, Document, SyncDirection};
pub use error::{Error, Result};
pub use formatter::{FormatOptions, XmlStreamFormatter};
pub use pagination::PageIndex;
pub use search::{Find, SearchDirection, SearchEngine, SearchMode, SearchQuery};
pub use tasks::{CancelToken, ProgressSink, TaskQueue};
