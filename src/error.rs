//! Error taxonomy for the paged editing engine.
//!
//! Everything long-running (indexing, disk search, formatting, save) funnels
//! through these variants. `Cancelled` is a normal termination path: callers
//! treat it like "no result", never like a failure, and it is not logged as
//! an error anywhere in the crate.

use std::path::PathBuf;

/// Errors produced by the paged editing core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Read or write failure. The in-flight operation is aborted and any
    /// temp-file artifact has already been rolled back when this surfaces.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Cooperative cancellation observed at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,

    /// The search pattern failed to compile as a regex.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Navigation was requested before the page index was (re)built.
    #[error("page index is stale or missing")]
    StaleIndex,

    /// `goto_page` outside `[1, max_page]`.
    #[error("page {requested} out of range 1..={max}")]
    PageOutOfRange { requested: usize, max: usize },

    /// A background task was submitted while another is still running.
    /// New work is blocked, not queued, while a worker is active.
    #[error("a background task is already running")]
    WorkerBusy,

    /// The document has no backing file for an operation that needs one.
    #[error("document has no file path: {0}")]
    NoBackingFile(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the cooperative-cancellation variant.
    ///
    /// Used by callers that must distinguish "user stopped it" from real
    /// failures without matching on the full enum.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
