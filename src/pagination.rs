//! Pagination: mapping a document onto fixed-size pages.
//!
//! Page boundaries are defined over decoded *characters* (that is what the
//! editor's page window shows) but persisted as *byte* offsets so disk mode
//! can seek straight to a page. The two only coincide for pure-ASCII input,
//! so the indexer byte-measures every character it consumes.

use std::fs::File;
use std::io::Read;

use crate::error::Result;
use crate::lines::count_lines;
use crate::tasks::{CancelToken, ProgressSink};

/// Derived page table for one document revision.
///
/// Invalidated wholesale whenever the underlying content changes
/// structurally; there is no incremental maintenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIndex {
    /// Starting byte offset of each page. Strictly increasing, first is 0.
    page_byte_offsets: Vec<u64>,
    /// Lines per page, counted page-locally.
    page_line_counts: Vec<usize>,
    /// Cumulative line number at which each page starts (0-based).
    page_starting_line_counts: Vec<usize>,
    /// Characters per page as requested at build time.
    page_size: usize,
    /// Total byte length of the indexed content.
    total_bytes: u64,
}

impl PageIndex {
    fn new(
        page_byte_offsets: Vec<u64>,
        page_line_counts: Vec<usize>,
        page_size: usize,
        total_bytes: u64,
    ) -> Self {
        debug_assert_eq!(page_byte_offsets.len(), page_line_counts.len());
        let page_starting_line_counts = starting_line_counts(&page_line_counts);
        Self {
            page_byte_offsets,
            page_line_counts,
            page_starting_line_counts,
            page_size,
            total_bytes,
        }
    }

    /// Number of pages; 0 for empty content.
    pub fn page_count(&self) -> usize {
        self.page_byte_offsets.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn byte_offsets(&self) -> &[u64] {
        &self.page_byte_offsets
    }

    pub fn line_counts(&self) -> &[usize] {
        &self.page_line_counts
    }

    pub fn starting_line_counts(&self) -> &[usize] {
        &self.page_starting_line_counts
    }

    /// Byte range of 1-based page `n`; the last page runs to EOF.
    pub fn byte_range(&self, page: usize) -> Option<std::ops::Range<u64>> {
        if page == 0 || page > self.page_count() {
            return None;
        }
        let start = self.page_byte_offsets[page - 1];
        let end = self
            .page_byte_offsets
            .get(page)
            .copied()
            .unwrap_or(self.total_bytes);
        Some(start..end)
    }

    /// Starting character offset of 1-based page `n` in the whole document.
    ///
    /// Uniform by construction: every page except the last holds exactly
    /// `page_size` characters.
    pub fn starting_char_offset(&self, page: usize) -> usize {
        self.page_size * (page - 1)
    }
}

/// Cumulative starting line numbers per page.
///
/// `out[0] = 0`; `out[i] = out[i-1] + line_counts[i-1] - 1` for `i >= 1`.
/// The `-1` corrects for the artificial line break introduced by cutting
/// the document at an arbitrary character offset: the fragment on each
/// side of the cut counts as a line of its own, but the document has only
/// one line there. The formula is applied uniformly, including when a
/// page boundary happens to coincide with a real line boundary.
pub fn starting_line_counts(line_counts: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(line_counts.len());
    for i in 0..line_counts.len() {
        if i == 0 {
            out.push(0);
        } else {
            out.push(out[i - 1] + line_counts[i - 1] - 1);
        }
    }
    out
}

/// Build a page index for `file`, reading it in `page_size`-character
/// chunks.
///
/// Reports `bytes_read / total_bytes` after each chunk and checks the
/// cancellation token once per chunk. An empty file yields an empty index.
/// Any I/O error aborts the build; partial results are discarded.
pub fn index_file(
    file: &File,
    page_size: usize,
    progress: &ProgressSink,
    cancel: &CancelToken,
) -> Result<PageIndex> {
    assert!(page_size > 0, "page size must be positive");
    let total_bytes = file.metadata()?.len();
    let mut reader = CharChunkReader::new(file);

    let mut offsets = Vec::new();
    let mut line_counts = Vec::new();
    let mut bytes_read: u64 = 0;

    loop {
        cancel.checkpoint()?;
        let (chunk, chunk_bytes) = reader.read_chunk(page_size)?;
        if chunk.is_empty() {
            break;
        }
        offsets.push(bytes_read);
        line_counts.push(count_lines(&chunk));
        bytes_read += chunk_bytes;
        if total_bytes > 0 {
            progress.report(bytes_read as f64 / total_bytes as f64);
        }
    }

    tracing::debug!(
        pages = offsets.len(),
        bytes = bytes_read,
        page_size,
        "built page index"
    );
    Ok(PageIndex::new(offsets, line_counts, page_size, bytes_read))
}

/// Build a page index for in-memory text; same page semantics as
/// [`index_file`] without the I/O.
pub fn index_text(text: &str, page_size: usize) -> PageIndex {
    assert!(page_size > 0, "page size must be positive");
    let mut offsets = Vec::new();
    let mut line_counts = Vec::new();
    let mut byte_pos: u64 = 0;
    let mut chars = text.chars();

    loop {
        let mut chunk = String::new();
        for _ in 0..page_size {
            match chars.next() {
                Some(ch) => chunk.push(ch),
                None => break,
            }
        }
        if chunk.is_empty() {
            break;
        }
        offsets.push(byte_pos);
        line_counts.push(count_lines(&chunk));
        byte_pos += chunk.len() as u64;
    }

    PageIndex::new(offsets, line_counts, page_size, text.len() as u64)
}

/// Extract the text of 1-based page `n` from in-memory content.
pub fn page_text(text: &str, page_size: usize, page: usize) -> String {
    text.chars()
        .skip(page_size * (page - 1))
        .take(page_size)
        .collect()
}

/// Read and decode the text of 1-based page `page` from an open file.
///
/// Seeks to the page's starting byte offset and reads exactly to the next
/// page's offset (EOF for the last page). Decoding is lossy, matching the
/// indexer's treatment of invalid UTF-8.
pub fn read_page_text(mut file: &File, index: &PageIndex, page: usize) -> Result<String> {
    use std::io::{Seek, SeekFrom};
    let range = index.byte_range(page).ok_or(crate::error::Error::StaleIndex)?;
    file.seek(SeekFrom::Start(range.start))?;
    let mut buf = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads a byte stream in fixed character-count chunks, tracking the exact
/// byte length of each chunk.
///
/// Invalid UTF-8 sequences decode to U+FFFD but are byte-accounted by their
/// real encoded length, so page byte offsets stay seekable even on dirty
/// input.
pub(crate) struct CharChunkReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    eof: bool,
}

const READ_BUF_SIZE: usize = 8192;

impl<R: Read> CharChunkReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; READ_BUF_SIZE],
            pos: 0,
            filled: 0,
            eof: false,
        }
    }

    /// Read up to `max_chars` characters; returns the decoded chunk and the
    /// number of source bytes it consumed. Empty chunk means EOF.
    fn read_chunk(&mut self, max_chars: usize) -> Result<(String, u64)> {
        let mut chunk = String::new();
        let mut consumed: u64 = 0;
        for _ in 0..max_chars {
            match self.next_char()? {
                Some((ch, byte_len)) => {
                    chunk.push(ch);
                    consumed += byte_len as u64;
                }
                None => break,
            }
        }
        Ok((chunk, consumed))
    }

    fn refill(&mut self) -> Result<()> {
        // Shift the unconsumed tail to the front, then top up.
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
        while !self.eof && self.filled < self.buf.len() {
            let n = self.inner.read(&mut self.buf[self.filled..])?;
            if n == 0 {
                self.eof = true;
            } else {
                self.filled += n;
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn next_char(&mut self) -> Result<Option<(char, usize)>> {
        // A UTF-8 scalar is at most 4 bytes; keep that much on hand.
        if self.filled - self.pos < 4 && !self.eof {
            self.refill()?;
        }
        if self.pos == self.filled {
            return Ok(None);
        }
        let window = &self.buf[self.pos..self.filled];
        match std::str::from_utf8(window) {
            Ok(s) => {
                // Whole window valid; take the first scalar.
                let ch = s.chars().next().expect("non-empty valid window");
                let len = ch.len_utf8();
                self.pos += len;
                Ok(Some((ch, len)))
            }
            Err(err) if err.valid_up_to() > 0 => {
                let s = std::str::from_utf8(&window[..err.valid_up_to()])
                    .expect("validated prefix");
                let ch = s.chars().next().expect("non-empty valid prefix");
                let len = ch.len_utf8();
                self.pos += len;
                Ok(Some((ch, len)))
            }
            Err(err) => {
                // Invalid leading sequence: substitute, consume its bytes.
                let bad = err.error_len().unwrap_or(window.len());
                self.pos += bad;
                Ok(Some((char::REPLACEMENT_CHARACTER, bad)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempfile;

    fn file_with(content: &[u8]) -> File {
        let mut f = tempfile().unwrap();
        f.write_all(content).unwrap();
        use std::io::Seek;
        f.seek(std::io::SeekFrom::Start(0)).unwrap();
        f
    }

    fn index(content: &[u8], page_size: usize) -> PageIndex {
        index_file(
            &file_with(content),
            page_size,
            &ProgressSink::disabled(),
            &CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_starting_line_counts_formula() {
        assert_eq!(starting_line_counts(&[1, 2, 3, 4]), vec![0, 0, 1, 3]);
        assert_eq!(starting_line_counts(&[]), Vec::<usize>::new());
        assert_eq!(starting_line_counts(&[5]), vec![0]);
    }

    #[test]
    fn test_empty_file_empty_index() {
        let idx = index(b"", 50);
        assert_eq!(idx.page_count(), 0);
        assert!(idx.byte_offsets().is_empty());
        assert!(idx.line_counts().is_empty());
    }

    #[test]
    fn test_ascii_offsets_match_chars() {
        // 120 ASCII chars, page size 50: pages of 50, 50, 20
        let content = "x".repeat(120);
        let idx = index(content.as_bytes(), 50);
        assert_eq!(idx.byte_offsets(), &[0, 50, 100]);
        assert_eq!(idx.byte_range(3).unwrap(), 100..120);
    }

    #[test]
    fn test_multibyte_fixture_offsets() {
        // Four pages of 50 chars each. Two-byte chars ('é') pad the byte
        // widths so the page byte offsets land at 0, 52, 110, 170.
        // Each page holds two line breaks, so three page-local lines.
        fn page(two_byte: usize) -> String {
            // two_byte multibyte chars + fillers + 2 newlines = 50 chars
            let fill = 50 - two_byte - 2;
            format!("{}{}\n\n", "é".repeat(two_byte), "a".repeat(fill))
        }
        let content = format!("{}{}{}{}", page(2), page(8), page(10), page(0));
        let idx = index(content.as_bytes(), 50);
        assert_eq!(idx.byte_offsets(), &[0, 52, 110, 170]);
        assert_eq!(idx.line_counts(), &[3, 3, 3, 3]);
        assert_eq!(idx.starting_line_counts(), &[0, 2, 4, 6]);
        assert_eq!(idx.total_bytes(), 220);
    }

    #[test]
    fn test_byte_offsets_strictly_increasing() {
        let content = "line one\nline two\nline three\n".repeat(20);
        let idx = index(content.as_bytes(), 37);
        let offs = idx.byte_offsets();
        assert_eq!(offs[0], 0);
        for w in offs.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_progress_reported_per_chunk() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let progress = ProgressSink::new(move |f| seen2.lock().unwrap().push(f));
        let content = "abcdefghij".repeat(10); // 100 bytes
        let idx = index_file(
            &file_with(content.as_bytes()),
            25,
            &progress,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(idx.page_count(), 4);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_cancelled_before_first_chunk() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = index_file(
            &file_with(b"some content"),
            4,
            &ProgressSink::disabled(),
            &cancel,
        );
        assert!(matches!(result, Err(crate::error::Error::Cancelled)));
    }

    #[test]
    fn test_index_text_agrees_with_index_file() {
        let content = "héllo wörld\nsecond line\nthird\n";
        let from_file = index(content.as_bytes(), 7);
        let from_text = index_text(content, 7);
        assert_eq!(from_file, from_text);
    }

    #[test]
    fn test_page_text_slicing() {
        let text = "abcdefghij";
        assert_eq!(page_text(text, 4, 1), "abcd");
        assert_eq!(page_text(text, 4, 2), "efgh");
        assert_eq!(page_text(text, 4, 3), "ij");
        assert_eq!(page_text(text, 4, 4), "");
    }

    #[test]
    fn test_invalid_utf8_byte_accounting() {
        // 0xFF is not valid UTF-8; it decodes to U+FFFD but must still be
        // counted as one source byte so later offsets stay seekable.
        let idx = index(b"ab\xFFcd", 2);
        assert_eq!(idx.byte_offsets(), &[0, 2, 4]);
        assert_eq!(idx.total_bytes(), 5);
    }
}
