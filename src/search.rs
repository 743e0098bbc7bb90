//! Search over canonical text and over paged files on disk.
//!
//! All offsets in queries and results are absolute *character* offsets
//! (half-open ranges), matching how the page window addresses content.
//! The regex engine works in bytes, so matches are mapped back to char
//! offsets before they leave this module.

use std::collections::HashMap;
use std::fs::File;
use std::sync::Mutex;

use regex::Regex;

use crate::error::{Error, Result};
use crate::pagination::PageIndex;
use crate::tasks::{CancelToken, ProgressSink};

/// How the pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Literal substring.
    Normal,
    /// Literal substring after expanding `\n`, `\r`, `\t` escapes.
    Extended,
    /// Regular expression.
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub pattern: String,
    pub mode: SearchMode,
    pub direction: SearchDirection,
    pub ignore_case: bool,
}

impl SearchQuery {
    pub fn new(pattern: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            pattern: pattern.into(),
            mode,
            direction: SearchDirection::Down,
            ignore_case: false,
        }
    }

    pub fn direction(mut self, direction: SearchDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }
}

/// One match: absolute half-open character range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Find {
    pub start: usize,
    pub end: usize,
}

impl Find {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Search engine with a per-instance compiled-regex cache.
///
/// The cache key is the literal string handed to the regex compiler.
/// Case-insensitivity is applied as an inline `(?i)` prefix on that
/// compile string; the caller's pattern is never mutated.
pub struct SearchEngine {
    regex_cache: Mutex<HashMap<String, Regex>>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self {
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Find the next match relative to `offset` (a char offset).
    ///
    /// Down: first match with `start >= offset`. Up: last match with
    /// `end <= offset`. Empty patterns never match.
    pub fn find_next(&self, text: &str, query: &SearchQuery, offset: usize) -> Result<Option<Find>> {
        if query.pattern.is_empty() {
            return Ok(None);
        }
        match query.mode {
            SearchMode::Normal | SearchMode::Extended => {
                Ok(self.find_literal(text, query, offset))
            }
            SearchMode::Regex => self.find_regex(text, query, offset),
        }
    }

    /// All matches, left to right, non-overlapping: after each match the
    /// scan resumes at the match's end, so `"abab"` over `"abababab"`
    /// yields exactly two matches.
    pub fn find_all(&self, text: &str, query: &SearchQuery) -> Result<Vec<Find>> {
        let mut down = query.clone();
        down.direction = SearchDirection::Down;
        let mut finds = Vec::new();
        let mut offset = 0;
        let total_chars = text.chars().count();
        while offset <= total_chars {
            match self.find_next(text, &down, offset)? {
                Some(find) => {
                    // Zero-width matches must still advance the scan.
                    offset = if find.is_empty() {
                        find.end + 1
                    } else {
                        find.end
                    };
                    finds.push(find);
                }
                None => break,
            }
        }
        Ok(finds)
    }

    /// Replace every match in `text`, returning the new text and the
    /// number of replacements.
    pub fn replace_all(
        &self,
        text: &str,
        query: &SearchQuery,
        replacement: &str,
    ) -> Result<(String, usize)> {
        let finds = self.find_all(text, query)?;
        if finds.is_empty() {
            return Ok((text.to_string(), 0));
        }
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for find in &finds {
            out.extend(&chars[cursor..find.start]);
            out.push_str(replacement);
            cursor = find.end;
        }
        out.extend(&chars[cursor..]);
        Ok((out, finds.len()))
    }

    /// Search a paged file on disk without materializing more than one
    /// page at a time.
    ///
    /// If `current_page` (1-based number plus the on-screen text) is
    /// supplied and the scan starts there, the supplied text is searched
    /// instead of the page's disk bytes — what the user sees wins over
    /// what the file holds. Pages are then scanned sequentially in the
    /// query's direction, one cancellation checkpoint and one progress
    /// report per page. In-page offsets are translated to absolute char
    /// offsets via each page's starting character index.
    ///
    /// Matches spanning a page boundary are not found; callers must keep
    /// the page size safely above the longest match they expect. This is
    /// a documented limitation of paged scanning, not an oversight.
    #[allow(clippy::too_many_arguments)]
    pub fn find_next_from_disk(
        &self,
        file: &File,
        query: &SearchQuery,
        char_offset: usize,
        index: &PageIndex,
        current_page: Option<(usize, &str)>,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Option<Find>> {
        let page_count = index.page_count();
        if page_count == 0 || query.pattern.is_empty() {
            return Ok(None);
        }
        let page_size = index.page_size();

        // Page containing the starting offset, clamped into range.
        let start_page = (char_offset / page_size + 1).min(page_count);

        let pages: Vec<usize> = match query.direction {
            SearchDirection::Down => (start_page..=page_count).collect(),
            SearchDirection::Up => (1..=start_page).rev().collect(),
        };
        let total = pages.len();

        for (scanned, page) in pages.into_iter().enumerate() {
            cancel.checkpoint()?;

            let page_start_chars = index.starting_char_offset(page);
            let text = match current_page {
                Some((visible_page, visible_text)) if visible_page == page => {
                    visible_text.to_string()
                }
                _ => crate::pagination::read_page_text(file, index, page)?,
            };
            let page_chars = text.chars().count();

            // Offset within this page: the real starting offset on the
            // first page, then the page extremity in the scan direction.
            let in_page_offset = if page == start_page {
                char_offset.saturating_sub(page_start_chars).min(page_chars)
            } else {
                match query.direction {
                    SearchDirection::Down => 0,
                    SearchDirection::Up => page_chars,
                }
            };

            if let Some(find) = self.find_next(&text, query, in_page_offset)? {
                progress.hide();
                return Ok(Some(Find {
                    start: page_start_chars + find.start,
                    end: page_start_chars + find.end,
                }));
            }
            progress.report((scanned + 1) as f64 / total as f64);
        }

        progress.hide();
        Ok(None)
    }

    // Literal (Normal/Extended) search over chars, case-aware.
    fn find_literal(&self, text: &str, query: &SearchQuery, offset: usize) -> Option<Find> {
        let pattern = match query.mode {
            SearchMode::Extended => expand_escapes(&query.pattern),
            _ => query.pattern.clone(),
        };
        let fold = |c: char| {
            if query.ignore_case {
                fold_case(c)
            } else {
                c
            }
        };
        let haystack: Vec<char> = text.chars().map(fold).collect();
        let needle: Vec<char> = pattern.chars().map(fold).collect();
        if needle.is_empty() || needle.len() > haystack.len() {
            return None;
        }
        let m = needle.len();
        let last_start = haystack.len() - m;

        match query.direction {
            SearchDirection::Down => {
                for i in offset..=last_start {
                    if haystack[i..i + m] == needle[..] {
                        return Some(Find {
                            start: i,
                            end: i + m,
                        });
                    }
                }
                None
            }
            SearchDirection::Up => {
                // Last occurrence ending at or before `offset`, scanning
                // backward from there.
                if offset < m {
                    return None;
                }
                let mut i = (offset - m).min(last_start);
                loop {
                    if haystack[i..i + m] == needle[..] {
                        return Some(Find {
                            start: i,
                            end: i + m,
                        });
                    }
                    if i == 0 {
                        return None;
                    }
                    i -= 1;
                }
            }
        }
    }

    fn find_regex(&self, text: &str, query: &SearchQuery, offset: usize) -> Result<Option<Find>> {
        let regex = self.compiled(query)?;
        let mut mapper = OffsetMapper::new(text);

        match query.direction {
            SearchDirection::Down => {
                let byte_offset = mapper.char_to_byte(offset);
                match regex.find_at(text, byte_offset) {
                    Some(m) => {
                        let start = mapper.byte_to_char(m.start());
                        let end = mapper.byte_to_char(m.end());
                        Ok(Some(Find { start, end }))
                    }
                    None => Ok(None),
                }
            }
            SearchDirection::Up => {
                // No backward regex scan: walk all matches from the start
                // and keep the last one ending at or before the offset.
                // Accepted O(n) cost.
                let mut best = None;
                for m in regex.find_iter(text) {
                    let start = mapper.byte_to_char(m.start());
                    let end = mapper.byte_to_char(m.end());
                    if end <= offset {
                        best = Some(Find { start, end });
                    } else {
                        break;
                    }
                }
                Ok(best)
            }
        }
    }

    /// Fetch or compile the regex for this query.
    fn compiled(&self, query: &SearchQuery) -> Result<Regex> {
        let compile_string = if query.ignore_case {
            format!("(?i){}", query.pattern)
        } else {
            query.pattern.clone()
        };
        let mut cache = self.regex_cache.lock().expect("regex cache poisoned");
        if let Some(regex) = cache.get(&compile_string) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&compile_string).map_err(|source| Error::InvalidPattern {
            pattern: query.pattern.clone(),
            source,
        })?;
        cache.insert(compile_string, regex.clone());
        Ok(regex)
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand the literal escapes Extended mode understands.
fn expand_escapes(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            Some('r') => {
                out.push('\r');
                chars.next();
            }
            Some('t') => {
                out.push('\t');
                chars.next();
            }
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Length-preserving case fold: a char folds to its lowercase form only
/// when that form is a single scalar, keeping char offsets stable.
fn fold_case(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(f), None) => f,
        _ => c,
    }
}

/// Monotonic char/byte offset translation over one text.
///
/// Queries must be non-decreasing, which all callers in this module
/// guarantee (matches arrive left to right).
struct OffsetMapper<'a> {
    text: &'a str,
    byte_pos: usize,
    char_pos: usize,
}

impl<'a> OffsetMapper<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte_pos: 0,
            char_pos: 0,
        }
    }

    fn char_to_byte(&mut self, char_offset: usize) -> usize {
        debug_assert!(char_offset >= self.char_pos);
        while self.char_pos < char_offset {
            match self.text[self.byte_pos..].chars().next() {
                Some(c) => {
                    self.byte_pos += c.len_utf8();
                    self.char_pos += 1;
                }
                None => break,
            }
        }
        self.byte_pos
    }

    fn byte_to_char(&mut self, byte_offset: usize) -> usize {
        debug_assert!(byte_offset >= self.byte_pos);
        while self.byte_pos < byte_offset {
            match self.text[self.byte_pos..].chars().next() {
                Some(c) => {
                    self.byte_pos += c.len_utf8();
                    self.char_pos += 1;
                }
                None => break,
            }
        }
        self.char_pos
    }
}
