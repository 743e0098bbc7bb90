//! Document controller: the one stateful orchestrator.
//!
//! A document is edited through a single visible page window. Depending on
//! size and settings, the authoritative content lives in one of three
//! places, modeled as a closed tagged variant rather than a trait object —
//! the three storage strategies are too different to share more than the
//! navigation API, and `match` keeps every mode's behavior in one place:
//!
//! - `Plain`: the whole document is the window.
//! - `Paginated`: canonical text in memory, the window shows one page.
//! - `DiskPaginated`: the file itself is authoritative; only the current
//!   page is ever resident.
//!
//! Workers never mutate a `Document`; heavy operations take progress and
//! cancellation handles, and the owning thread applies results.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::formatter::{FormatOptions, XmlStreamFormatter};
use crate::pagination::{index_file, index_text, page_text, read_page_text, PageIndex};
use crate::search::{Find, SearchEngine, SearchQuery};
use crate::tasks::{CancelToken, ProgressSink};
use crate::watcher::FileWatcher;

/// Which storage strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Plain,
    Paginated,
    DiskPaginated,
}

/// Direction of reconciliation between the visible window and the
/// authoritative content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Fold visible-window edits back into canonical text (or, in disk
    /// mode, into a rewritten file).
    ToCanonical,
    /// Canonical content changed structurally (formatting, replace-all);
    /// overwrite the visible window from it.
    ToVisible,
}

enum Storage {
    Plain {
        text: String,
    },
    Paginated {
        text: String,
        index: PageIndex,
    },
    DiskPaginated {
        file: File,
        index: PageIndex,
    },
}

/// One open editing session.
pub struct Document {
    path: Option<PathBuf>,
    storage: Storage,
    /// The editable buffer shown to the user; always one page.
    visible: String,
    /// 1-based.
    current_page: usize,
    is_dirty: bool,
    dirty_since_sync: bool,
    settings: Settings,
    search: SearchEngine,
    watcher: Option<Arc<FileWatcher>>,
}

impl Document {
    /// Open a file, selecting the display mode from size and settings.
    pub fn open(path: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
        Self::open_with(path, settings, &ProgressSink::disabled(), &CancelToken::new())
    }

    /// Open with progress reporting and cancellation (disk-mode indexing
    /// walks the whole file).
    pub fn open_with(
        path: impl Into<PathBuf>,
        settings: Settings,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let path = path.into();
        let file_size = std::fs::metadata(&path)?.len();

        let storage =
            if settings.disk_pagination_enabled && file_size > settings.disk_pagination_threshold {
                let file = File::open(&path)?;
                let index = index_file(&file, settings.page_size, progress, cancel)?;
                Storage::DiskPaginated { file, index }
            } else {
                let text = std::fs::read_to_string(&path)?;
                Self::memory_storage(text, &settings)
            };

        let mut doc = Self {
            path: Some(path),
            storage,
            visible: String::new(),
            current_page: 1,
            is_dirty: false,
            dirty_since_sync: false,
            settings,
            search: SearchEngine::new(),
            watcher: None,
        };
        doc.load_visible()?;
        tracing::info!(
            path = %doc.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            mode = ?doc.mode(),
            pages = doc.page_count(),
            "opened document"
        );
        Ok(doc)
    }

    /// Create an unsaved document from in-memory text.
    pub fn from_text(text: impl Into<String>, settings: Settings) -> Self {
        let storage = Self::memory_storage(text.into(), &settings);
        let mut doc = Self {
            path: None,
            storage,
            visible: String::new(),
            current_page: 1,
            is_dirty: false,
            dirty_since_sync: false,
            settings,
            search: SearchEngine::new(),
            watcher: None,
        };
        doc.load_visible().expect("in-memory load cannot fail");
        doc
    }

    fn memory_storage(text: String, settings: &Settings) -> Storage {
        let char_len = text.chars().count();
        if settings.pagination_enabled && char_len > settings.pagination_threshold {
            let index = index_text(&text, settings.page_size);
            Storage::Paginated { text, index }
        } else {
            Storage::Plain { text }
        }
    }

    /// Register the change notifier so self-writes can be bracketed with
    /// ignore calls.
    pub fn set_watcher(&mut self, watcher: Arc<FileWatcher>) {
        self.watcher = Some(watcher);
    }

    pub fn mode(&self) -> DisplayMode {
        match &self.storage {
            Storage::Plain { .. } => DisplayMode::Plain,
            Storage::Paginated { .. } => DisplayMode::Paginated,
            Storage::DiskPaginated { .. } => DisplayMode::DiskPaginated,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn visible_text(&self) -> &str {
        &self.visible
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn dirty_since_sync(&self) -> bool {
        self.dirty_since_sync
    }

    /// The page table, if this mode has one.
    pub fn page_index(&self) -> Option<&PageIndex> {
        match &self.storage {
            Storage::Plain { .. } => None,
            Storage::Paginated { index, .. } | Storage::DiskPaginated { index, .. } => Some(index),
        }
    }

    pub fn page_count(&self) -> usize {
        match &self.storage {
            Storage::Plain { .. } => 1,
            Storage::Paginated { index, .. } | Storage::DiskPaginated { index, .. } => {
                index.page_count().max(1)
            }
        }
    }

    /// Replace the visible window's content with an edited version.
    pub fn edit_visible(&mut self, text: impl Into<String>) {
        self.visible = text.into();
        self.is_dirty = true;
        self.dirty_since_sync = true;
    }

    /// Navigate to 1-based page `n`.
    ///
    /// Pending window edits are folded back first, the page table is
    /// rebuilt, and the new page's bytes are loaded into the window. The
    /// window's dirty flag is cleared once the edits are safely synced.
    pub fn goto_page(&mut self, n: usize) -> Result<()> {
        self.goto_page_with(n, &ProgressSink::disabled(), &CancelToken::new())
    }

    pub fn goto_page_with(
        &mut self,
        n: usize,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        if n == 0 || n > self.page_count() {
            return Err(Error::PageOutOfRange {
                requested: n,
                max: self.page_count(),
            });
        }
        if self.dirty_since_sync {
            self.sync_with(SyncDirection::ToCanonical, progress, cancel)?;
        }
        // Folding edits back can change the page count.
        let max = self.page_count();
        self.current_page = n.min(max);
        self.load_visible()?;
        self.is_dirty = false;
        Ok(())
    }

    /// Reconcile the visible window and the authoritative content.
    pub fn sync(&mut self, direction: SyncDirection) -> Result<()> {
        self.sync_with(direction, &ProgressSink::disabled(), &CancelToken::new())
    }

    pub fn sync_with(
        &mut self,
        direction: SyncDirection,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        match direction {
            SyncDirection::ToCanonical => {
                match &mut self.storage {
                    Storage::Plain { text } => {
                        *text = self.visible.clone();
                    }
                    Storage::Paginated { text, index } => {
                        let page_size = self.settings.page_size;
                        *text = splice_page(text, page_size, self.current_page, &self.visible);
                        *index = index_text(text, page_size);
                        self.current_page = self.current_page.min(index.page_count().max(1));
                    }
                    Storage::DiskPaginated { .. } => {
                        let target = self
                            .path
                            .clone()
                            .ok_or_else(|| Error::NoBackingFile(PathBuf::new()))?;
                        self.stream_to_file(&target, progress, cancel)?;
                        self.reopen_disk_storage(&target, progress, cancel)?;
                    }
                }
                self.dirty_since_sync = false;
            }
            SyncDirection::ToVisible => {
                self.load_visible()?;
                self.dirty_since_sync = false;
            }
        }
        Ok(())
    }

    /// Load the current page's content into the visible window.
    fn load_visible(&mut self) -> Result<()> {
        self.visible = match &self.storage {
            Storage::Plain { text } => text.clone(),
            Storage::Paginated { text, .. } => {
                page_text(text, self.settings.page_size, self.current_page)
            }
            Storage::DiskPaginated { file, index } => {
                if index.page_count() == 0 {
                    String::new()
                } else {
                    read_page_text(file, index, self.current_page)?
                }
            }
        };
        Ok(())
    }

    /// Save to the document's own path.
    pub fn save(&mut self) -> Result<()> {
        self.save_with(&ProgressSink::disabled(), &CancelToken::new())
    }

    pub fn save_with(&mut self, progress: &ProgressSink, cancel: &CancelToken) -> Result<()> {
        let target = self
            .path
            .clone()
            .ok_or_else(|| Error::NoBackingFile(PathBuf::new()))?;
        self.save_as_with(&target, progress, cancel)
    }

    /// Save to `target`, adopting it as the document's path.
    ///
    /// Plain/Paginated write canonical text in one pass. DiskPaginated
    /// cannot overwrite the file it is reading from, so it always streams
    /// page-by-page into a temp file — substituting the visible window for
    /// the current page — and atomically replaces the target. Any failure
    /// mid-stream discards the temp file and leaves the original intact.
    pub fn save_as_with(
        &mut self,
        target: &Path,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        match &mut self.storage {
            Storage::Plain { .. } | Storage::Paginated { .. } => {
                if self.dirty_since_sync {
                    self.sync_with(SyncDirection::ToCanonical, progress, cancel)?;
                }
                let text = match &self.storage {
                    Storage::Plain { text } | Storage::Paginated { text, .. } => text,
                    Storage::DiskPaginated { .. } => unreachable!(),
                };
                self.ignoring_own_write(target, |_self, text| {
                    std::fs::write(target, text)?;
                    Ok(())
                }, text.clone())?;
            }
            Storage::DiskPaginated { .. } => {
                self.stream_to_file(target, progress, cancel)?;
                self.reopen_disk_storage(target, progress, cancel)?;
            }
        }
        self.path = Some(target.to_path_buf());
        self.is_dirty = false;
        self.dirty_since_sync = false;
        progress.hide();
        tracing::info!(path = %target.display(), "saved document");
        Ok(())
    }

    /// Stream the disk-mode file into a temp sibling of `target`, with the
    /// visible window standing in for the current page, then atomically
    /// replace `target`.
    fn stream_to_file(
        &mut self,
        target: &Path,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        let (file, index) = match &mut self.storage {
            Storage::DiskPaginated { file, index } => (file, index),
            _ => unreachable!("stream_to_file is disk-mode only"),
        };

        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let page_count = index.page_count();

        file.seek(SeekFrom::Start(0))?;
        for page in 1..=page_count.max(1) {
            cancel.checkpoint()?;
            let range = match index.byte_range(page) {
                Some(range) => range,
                None => break, // empty file
            };
            let len = (range.end - range.start) as usize;
            if page == self.current_page {
                // Substitute the window's bytes, skip the originals.
                tmp.write_all(self.visible.as_bytes())?;
                file.seek(SeekFrom::Current(len as i64))?;
            } else {
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                tmp.write_all(&buf)?;
            }
            if page_count > 0 {
                progress.report(page as f64 / page_count as f64);
            }
        }
        tmp.flush()?;

        if let (Some(watcher), Some(own_path)) = (&self.watcher, &self.path) {
            watcher.start_ignoring(own_path);
        }
        let persist_result = tmp.persist(target);
        if let (Some(watcher), Some(own_path)) = (&self.watcher, &self.path) {
            watcher.stop_ignoring(own_path);
        }
        persist_result.map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Re-open and re-index the disk-mode backing file after a rewrite.
    fn reopen_disk_storage(
        &mut self,
        target: &Path,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        let file = File::open(target)?;
        let index = index_file(&file, self.settings.page_size, progress, cancel)?;
        self.storage = Storage::DiskPaginated { file, index };
        self.current_page = self.current_page.min(self.page_count());
        Ok(())
    }

    fn ignoring_own_write<T>(
        &self,
        target: &Path,
        write: impl FnOnce(&Self, T) -> Result<()>,
        payload: T,
    ) -> Result<()> {
        if let Some(watcher) = &self.watcher {
            watcher.start_ignoring(target);
        }
        let result = write(self, payload);
        if let Some(watcher) = &self.watcher {
            watcher.stop_ignoring(target);
        }
        result
    }

    /// Reformat the whole document, replacing canonical text (or the
    /// backing file) with the formatter's output.
    pub fn format(&mut self, options: FormatOptions) -> Result<()> {
        self.format_with(options, &ProgressSink::disabled(), &CancelToken::new())
    }

    pub fn format_with(
        &mut self,
        options: FormatOptions,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        if self.dirty_since_sync {
            self.sync_with(SyncDirection::ToCanonical, progress, cancel)?;
        }
        match &mut self.storage {
            Storage::Plain { text } => {
                let mut out = Vec::with_capacity(text.len());
                XmlStreamFormatter::new(options, text.as_bytes(), &mut out).run(cancel)?;
                *text = String::from_utf8_lossy(&out).into_owned();
            }
            Storage::Paginated { text, index } => {
                let mut out = Vec::with_capacity(text.len());
                XmlStreamFormatter::new(options, text.as_bytes(), &mut out).run(cancel)?;
                *text = String::from_utf8_lossy(&out).into_owned();
                *index = index_text(text, self.settings.page_size);
                self.current_page = self.current_page.min(index.page_count().max(1));
            }
            Storage::DiskPaginated { file, .. } => {
                let target = self
                    .path
                    .clone()
                    .ok_or_else(|| Error::NoBackingFile(PathBuf::new()))?;
                let dir = target.parent().unwrap_or_else(|| Path::new("."));
                let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
                file.seek(SeekFrom::Start(0))?;
                XmlStreamFormatter::new(options, &*file, &mut tmp).run(cancel)?;
                tmp.flush()?;

                if let Some(watcher) = &self.watcher {
                    watcher.start_ignoring(&target);
                }
                let persist_result = tmp.persist(&target);
                if let Some(watcher) = &self.watcher {
                    watcher.stop_ignoring(&target);
                }
                persist_result.map_err(|e| Error::Io(e.error))?;
                self.reopen_disk_storage(&target, progress, cancel)?;
            }
        }
        // The document changed under the window; overwrite it.
        self.sync_with(SyncDirection::ToVisible, progress, cancel)?;
        self.is_dirty = true;
        progress.hide();
        Ok(())
    }

    /// Find the next match from `offset` (absolute char offset).
    pub fn find_next(&mut self, query: &SearchQuery, offset: usize) -> Result<Option<Find>> {
        self.find_next_with(query, offset, &ProgressSink::disabled(), &CancelToken::new())
    }

    pub fn find_next_with(
        &mut self,
        query: &SearchQuery,
        offset: usize,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Option<Find>> {
        // In-memory modes search canonical text, which must reflect the
        // window first.
        if self.dirty_since_sync && !matches!(self.storage, Storage::DiskPaginated { .. }) {
            self.sync_with(SyncDirection::ToCanonical, progress, cancel)?;
        }
        match &self.storage {
            Storage::Plain { text } | Storage::Paginated { text, .. } => {
                self.search.find_next(text, query, offset)
            }
            Storage::DiskPaginated { file, index } => self.search.find_next_from_disk(
                file,
                query,
                offset,
                index,
                Some((self.current_page, self.visible.as_str())),
                progress,
                cancel,
            ),
        }
    }

    /// All matches. Whole document for in-memory modes; for disk mode,
    /// only the resident page is scanned.
    pub fn find_all(&mut self, query: &SearchQuery) -> Result<Vec<Find>> {
        if self.dirty_since_sync && !matches!(self.storage, Storage::DiskPaginated { .. }) {
            self.sync(SyncDirection::ToCanonical)?;
        }
        match &self.storage {
            Storage::Plain { text } | Storage::Paginated { text, .. } => {
                self.search.find_all(text, query)
            }
            Storage::DiskPaginated { index, .. } => {
                let base = index.starting_char_offset(self.current_page);
                let mut finds = self.search.find_all(&self.visible, query)?;
                for f in &mut finds {
                    f.start += base;
                    f.end += base;
                }
                Ok(finds)
            }
        }
    }

    /// Replace every match, returning the replacement count. In-memory
    /// modes rewrite canonical text; disk mode edits the resident page.
    pub fn replace_all(&mut self, query: &SearchQuery, replacement: &str) -> Result<usize> {
        if self.dirty_since_sync && !matches!(self.storage, Storage::DiskPaginated { .. }) {
            self.sync(SyncDirection::ToCanonical)?;
        }
        let count = match &mut self.storage {
            Storage::Plain { text } => {
                let (new_text, count) = self.search.replace_all(text, query, replacement)?;
                *text = new_text;
                count
            }
            Storage::Paginated { text, index } => {
                let (new_text, count) = self.search.replace_all(text, query, replacement)?;
                *text = new_text;
                *index = index_text(text, self.settings.page_size);
                self.current_page = self.current_page.min(index.page_count().max(1));
                count
            }
            Storage::DiskPaginated { .. } => {
                let (new_window, count) =
                    self.search
                        .replace_all(&self.visible, query, replacement)?;
                if count > 0 {
                    self.edit_visible(new_window);
                }
                return Ok(count);
            }
        };
        if count > 0 {
            self.sync(SyncDirection::ToVisible)?;
            self.is_dirty = true;
        }
        Ok(count)
    }

    /// Replace the char range `[start, end)` of the document with
    /// `replacement`.
    ///
    /// In-memory modes splice canonical text directly. Disk mode first
    /// navigates to the page containing `start` (folding pending edits
    /// back), then edits the resident window; the range is clamped to
    /// that page.
    pub fn replace_range(&mut self, start: usize, end: usize, replacement: &str) -> Result<()> {
        match &self.storage {
            Storage::Plain { .. } | Storage::Paginated { .. } => {
                if self.dirty_since_sync {
                    self.sync(SyncDirection::ToCanonical)?;
                }
                match &mut self.storage {
                    Storage::Plain { text } => {
                        *text = splice_chars(text, start, end, replacement);
                    }
                    Storage::Paginated { text, index } => {
                        *text = splice_chars(text, start, end, replacement);
                        *index = index_text(text, self.settings.page_size);
                        self.current_page = self.current_page.min(index.page_count().max(1));
                    }
                    Storage::DiskPaginated { .. } => unreachable!(),
                }
                self.sync(SyncDirection::ToVisible)?;
                self.is_dirty = true;
            }
            Storage::DiskPaginated { index, .. } => {
                let page_size = index.page_size();
                let page = (start / page_size + 1).min(self.page_count());
                if page != self.current_page {
                    self.goto_page(page)?;
                }
                let base = page_size * (page - 1);
                let window_chars = self.visible.chars().count();
                let in_start = start.saturating_sub(base).min(window_chars);
                let in_end = end.saturating_sub(base).min(window_chars);
                let new_window = splice_chars(&self.visible, in_start, in_end, replacement);
                self.edit_visible(new_window);
            }
        }
        Ok(())
    }

    /// Find the next match from `offset` and replace it, returning the
    /// char range now occupied by the replacement.
    pub fn replace_next(
        &mut self,
        query: &SearchQuery,
        offset: usize,
        replacement: &str,
    ) -> Result<Option<Find>> {
        let find = match self.find_next(query, offset)? {
            Some(find) => find,
            None => return Ok(None),
        };
        self.replace_range(find.start, find.end, replacement)?;
        Ok(Some(Find {
            start: find.start,
            end: find.start + replacement.chars().count(),
        }))
    }

    /// Re-read settings and re-evaluate the display mode, reloading
    /// content under the new mode's rules.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<()> {
        self.apply_settings_with(settings, &ProgressSink::disabled(), &CancelToken::new())
    }

    pub fn apply_settings_with(
        &mut self,
        settings: Settings,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        if self.dirty_since_sync {
            self.sync_with(SyncDirection::ToCanonical, progress, cancel)?;
        }
        let old_mode = self.mode();
        self.settings = settings;

        self.storage = match std::mem::replace(
            &mut self.storage,
            Storage::Plain {
                text: String::new(),
            },
        ) {
            Storage::DiskPaginated { .. } => {
                // Disk mode holds no canonical text; reload from the file.
                let path = self
                    .path
                    .clone()
                    .ok_or_else(|| Error::NoBackingFile(PathBuf::new()))?;
                let file_size = std::fs::metadata(&path)?.len();
                if self.settings.disk_pagination_enabled
                    && file_size > self.settings.disk_pagination_threshold
                {
                    let file = File::open(&path)?;
                    let index = index_file(&file, self.settings.page_size, progress, cancel)?;
                    Storage::DiskPaginated { file, index }
                } else {
                    Self::memory_storage(std::fs::read_to_string(&path)?, &self.settings)
                }
            }
            Storage::Plain { text } | Storage::Paginated { text, .. } => {
                // Content already in memory; disk mode requires a synced
                // file, so spill to it when crossing that threshold.
                let file_size = text.len() as u64;
                if self.settings.disk_pagination_enabled
                    && file_size > self.settings.disk_pagination_threshold
                    && self.path.is_some()
                {
                    let path = self.path.clone().expect("checked above");
                    self.ignoring_own_write(&path, |_self, text: String| {
                        std::fs::write(&path, text)?;
                        Ok(())
                    }, text)?;
                    let file = File::open(&path)?;
                    let index = index_file(&file, self.settings.page_size, progress, cancel)?;
                    Storage::DiskPaginated { file, index }
                } else {
                    Self::memory_storage(text, &self.settings)
                }
            }
        };

        self.current_page = self.current_page.min(self.page_count());
        self.load_visible()?;
        if old_mode != self.mode() {
            tracing::info!(from = ?old_mode, to = ?self.mode(), "display mode changed");
        }
        Ok(())
    }
}

/// Replace the char range `[start, end)` with `replacement`.
fn splice_chars(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len() + replacement.len());
    let mut it = text.chars();
    out.extend(it.by_ref().take(start));
    out.push_str(replacement);
    out.extend(it.skip(end.saturating_sub(start)));
    out
}

/// Replace the char range occupied by 1-based page `page` with `window`.
fn splice_page(text: &str, page_size: usize, page: usize, window: &str) -> String {
    let start = page_size * (page - 1);
    let mut out = String::with_capacity(text.len());
    let mut it = text.chars();
    out.extend(it.by_ref().take(start));
    out.push_str(window);
    out.extend(it.skip(page_size));
    out
}
