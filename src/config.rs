//! Editor settings consumed by the paging engine.
//!
//! Settings are read at document open and re-read whenever the caller
//! signals a change; the document controller re-evaluates its display
//! mode against the thresholds each time.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pagination and disk-pagination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Characters per page for the visible window.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Enable in-memory pagination for long documents.
    #[serde(default = "default_true")]
    pub pagination_enabled: bool,

    /// Content length (in characters) above which a document is paginated.
    #[serde(default = "default_pagination_threshold")]
    pub pagination_threshold: usize,

    /// Enable disk pagination for very large files.
    #[serde(default = "default_true")]
    pub disk_pagination_enabled: bool,

    /// File size (in bytes) above which the file itself becomes the
    /// authoritative store and only one page is kept in memory.
    #[serde(default = "default_disk_pagination_threshold")]
    pub disk_pagination_threshold: u64,
}

fn default_page_size() -> usize {
    65536
}

fn default_true() -> bool {
    true
}

fn default_pagination_threshold() -> usize {
    1_000_000
}

fn default_disk_pagination_threshold() -> u64 {
    20_000_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            pagination_enabled: default_true(),
            pagination_threshold: default_pagination_threshold(),
            disk_pagination_enabled: default_true(),
            disk_pagination_threshold: default_disk_pagination_threshold(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file.
    ///
    /// A missing or unparsable file falls back to defaults with a warning
    /// rather than failing the open.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse settings from {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist settings as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        let json = serde_json::to_string_pretty(self).expect("settings always serialize");
        std::fs::write(path, json)?;
        tracing::debug!("Saved settings to {}", path.display());
        Ok(())
    }
}
