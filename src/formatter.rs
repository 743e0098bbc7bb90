//! Streaming XML pretty/ugly printer.
//!
//! A single-pass state machine over a character stream. It performs no
//! well-formedness validation: truncated or malformed input simply runs
//! out of characters mid-state and produces best-effort output. That is
//! the point — "force pretty print" and "ugly print" must tolerate XML a
//! strict parser would reject.
//!
//! Heuristics worth knowing about:
//! - Raw text is buffered until the next `<`. If that `<` opens a closing
//!   tag the buffer is genuine element content and is written verbatim;
//!   otherwise it is treated as inter-tag whitespace and dropped. Mixed
//!   content therefore does not survive reformatting.
//! - CDATA sections count as data, not as sibling boundaries.

use std::io::{Read, Write};

use crate::error::Result;
use crate::pagination::CharChunkReader;
use crate::tasks::CancelToken;

/// Formatter output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Emit a line break plus indentation before structural tags.
    pub with_new_lines: bool,
    /// Spaces added per nesting level; ignored without `with_new_lines`.
    pub indent_size: usize,
}

impl FormatOptions {
    /// Pretty print: one element per line, indented.
    pub fn pretty(indent_size: usize) -> Self {
        Self {
            with_new_lines: true,
            indent_size,
        }
    }

    /// Ugly print: everything on a single line, inter-tag whitespace
    /// stripped.
    pub fn ugly() -> Self {
        Self {
            with_new_lines: false,
            indent_size: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Between,
    OpeningTag,
    ClosingTag,
    XmlDeclTag,
    Comment,
    CData,
    Data,
}

/// Output buffer flushed in full blocks; final partial flush at EOF.
const FLUSH_SIZE: usize = 8192;
/// Cancellation checkpoint cadence, in consumed characters.
const CHECKPOINT_EVERY: usize = 8192;

/// Single-pass streaming formatter.
pub struct XmlStreamFormatter<R: Read, W: Write> {
    source: CharSource<R>,
    writer: W,
    options: FormatOptions,
    state: State,
    indent: usize,
    out: String,
    emitted_any: bool,
    data_buf: String,
}

impl<R: Read, W: Write> XmlStreamFormatter<R, W> {
    pub fn new(options: FormatOptions, reader: R, writer: W) -> Self {
        Self {
            source: CharSource::new(reader),
            writer,
            options,
            state: State::Between,
            indent: 0,
            out: String::with_capacity(FLUSH_SIZE),
            emitted_any: false,
            data_buf: String::new(),
        }
    }

    /// Drive the machine to EOF. There is no terminal state; whatever
    /// state is current when input runs out is simply abandoned.
    pub fn run(mut self, cancel: &CancelToken) -> Result<()> {
        let mut since_checkpoint = 0usize;
        loop {
            since_checkpoint += 1;
            if since_checkpoint >= CHECKPOINT_EVERY {
                cancel.checkpoint()?;
                since_checkpoint = 0;
            }
            let ch = match self.source.next()? {
                Some(c) => c,
                None => break,
            };
            match self.state {
                State::Between => {
                    if ch == '<' {
                        self.dispatch_tag(true)?;
                    }
                    // Anything else between tags is discarded.
                }
                State::Data => {
                    if ch == '<' {
                        if self.source.peek(0)? == Some('/') {
                            // Genuine element content; keep it inline.
                            let content = std::mem::take(&mut self.data_buf);
                            self.emit_str(&content)?;
                            self.enter_closing_tag(false)?;
                        } else {
                            // Inter-tag whitespace, drop it.
                            self.data_buf.clear();
                            self.dispatch_tag(true)?;
                        }
                    } else {
                        self.data_buf.push(ch);
                    }
                }
                State::OpeningTag => {
                    self.emit(ch)?;
                    if ch == '>' {
                        self.state = State::Data;
                    }
                }
                State::ClosingTag => {
                    self.emit(ch)?;
                    if ch == '>' {
                        self.state = State::Between;
                    }
                }
                State::XmlDeclTag => {
                    self.emit(ch)?;
                    if ch == '>' {
                        self.state = State::Between;
                    }
                }
                State::Comment => {
                    self.emit(ch)?;
                    if self.out_ends_with("-->") {
                        self.state = State::Between;
                    }
                }
                State::CData => {
                    self.emit(ch)?;
                    if self.out_ends_with("]]>") {
                        self.state = State::Data;
                    }
                }
            }
        }

        if self.options.with_new_lines && self.emitted_any {
            self.out.push('\n');
        }
        self.flush_all()?;
        Ok(())
    }

    /// Having consumed a `<`, pick the next state from 1–2 characters of
    /// lookahead. The lookahead characters stay in the stream; the tag
    /// states copy them through.
    fn dispatch_tag(&mut self, indent_closing: bool) -> Result<()> {
        match self.source.peek(0)? {
            Some('?') => {
                self.emit('<')?;
                self.state = State::XmlDeclTag;
            }
            Some('/') => {
                self.enter_closing_tag(indent_closing)?;
            }
            Some('!') => {
                if self.source.peek(1)? == Some('[') {
                    self.emit('<')?;
                    self.state = State::CData;
                } else {
                    // Comments sit at the current level; no indent change.
                    self.emit_indent()?;
                    self.emit('<')?;
                    self.state = State::Comment;
                }
            }
            _ => {
                self.emit_indent()?;
                self.emit('<')?;
                self.indent += self.options.indent_size;
                self.state = State::OpeningTag;
            }
        }
        Ok(())
    }

    /// Dedent, optionally break the line, and start copying a closing tag.
    ///
    /// `with_indent` is false when the tag directly follows element
    /// content, so `<tag>text</tag>` stays on one line.
    fn enter_closing_tag(&mut self, with_indent: bool) -> Result<()> {
        self.indent = self.indent.saturating_sub(self.options.indent_size);
        if with_indent {
            self.emit_indent()?;
        }
        self.emit('<')?;
        self.state = State::ClosingTag;
        Ok(())
    }

    /// Line break plus current indentation, except before the very first
    /// emitted character.
    fn emit_indent(&mut self) -> Result<()> {
        if !self.options.with_new_lines {
            return Ok(());
        }
        if self.emitted_any {
            self.out.push('\n');
        }
        for _ in 0..self.indent {
            self.out.push(' ');
        }
        self.maybe_flush()
    }

    fn emit(&mut self, ch: char) -> Result<()> {
        self.out.push(ch);
        self.emitted_any = true;
        self.maybe_flush()
    }

    fn emit_str(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.out.push_str(s);
        self.emitted_any = true;
        self.maybe_flush()
    }

    /// Tail check against the unflushed output plus a copied-through
    /// sentinel window, used to spot `-->` and `]]>`.
    fn out_ends_with(&self, suffix: &str) -> bool {
        self.out.ends_with(suffix)
    }

    fn maybe_flush(&mut self) -> Result<()> {
        // Keep a small tail resident so sentinel checks keep working
        // across flush boundaries.
        const TAIL: usize = 4;
        if self.out.len() >= FLUSH_SIZE {
            let keep_from = self.out.len() - TAIL;
            // Flush only up to a char boundary below the tail.
            let mut cut = keep_from;
            while !self.out.is_char_boundary(cut) {
                cut -= 1;
            }
            self.writer.write_all(self.out[..cut].as_bytes())?;
            self.out.drain(..cut);
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        if !self.out.is_empty() {
            self.writer.write_all(self.out.as_bytes())?;
            self.out.clear();
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Character source with 1–2 chars of lookahead.
///
/// Lookahead beyond the primary read buffer is satisfied by pulling ahead
/// into a small secondary queue, so the not-yet-consumed characters of the
/// primary buffer are never discarded.
struct CharSource<R: Read> {
    reader: CharChunkReader<R>,
    lookahead: std::collections::VecDeque<char>,
}

impl<R: Read> CharSource<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: CharChunkReader::new(reader),
            lookahead: std::collections::VecDeque::new(),
        }
    }

    fn next(&mut self) -> Result<Option<char>> {
        if let Some(ch) = self.lookahead.pop_front() {
            return Ok(Some(ch));
        }
        Ok(self.reader.next_char()?.map(|(ch, _)| ch))
    }

    /// Peek `n` characters ahead (0-based) without consuming.
    fn peek(&mut self, n: usize) -> Result<Option<char>> {
        while self.lookahead.len() <= n {
            match self.reader.next_char()? {
                Some((ch, _)) => self.lookahead.push_back(ch),
                None => return Ok(None),
            }
        }
        Ok(self.lookahead.get(n).copied())
    }
}

/// Format in-memory text, returning the formatted string.
pub fn format_str(text: &str, options: FormatOptions) -> Result<String> {
    let mut out = Vec::with_capacity(text.len());
    let formatter = XmlStreamFormatter::new(options, text.as_bytes(), &mut out);
    formatter.run(&CancelToken::new())?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Pretty print with the given indent width.
pub fn pretty_print_str(text: &str, indent_size: usize) -> Result<String> {
    format_str(text, FormatOptions::pretty(indent_size))
}

/// Collapse to a single line with inter-tag whitespace removed.
pub fn ugly_print_str(text: &str) -> Result<String> {
    format_str(text, FormatOptions::ugly())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ugly_empty_is_empty() {
        assert_eq!(ugly_print_str("").unwrap(), "");
    }

    #[test]
    fn test_pretty_simple_document() {
        let input = r#"<?xml version="1.0"?><root><item>text</item><empty></empty></root>"#;
        let expected = "<?xml version=\"1.0\"?>\n\
                        <root>\n  <item>text</item>\n  <empty></empty>\n</root>\n";
        assert_eq!(pretty_print_str(input, 2).unwrap(), expected);
    }

    #[test]
    fn test_pretty_reindents_messy_input() {
        let input = "<a>\n      <b>x</b>    </a>";
        assert_eq!(pretty_print_str(input, 2).unwrap(), "<a>\n  <b>x</b>\n</a>\n");
    }

    #[test]
    fn test_ugly_collapses_whitespace() {
        let input = "<a>\n  <b>x</b>\n  <c>y</c>\n</a>\n";
        assert_eq!(ugly_print_str(input).unwrap(), "<a><b>x</b><c>y</c></a>");
    }

    #[test]
    fn test_ugly_then_pretty_is_stable() {
        let pretty = "<a>\n  <b>x</b>\n</a>\n";
        let ugly = ugly_print_str(pretty).unwrap();
        assert_eq!(pretty_print_str(&ugly, 2).unwrap(), pretty);
    }

    #[test]
    fn test_content_stays_inline() {
        let input = "<greeting>hello world</greeting>";
        assert_eq!(
            pretty_print_str(input, 2).unwrap(),
            "<greeting>hello world</greeting>\n"
        );
    }

    #[test]
    fn test_comment_indented_without_level_change() {
        let input = "<a><!-- note --><b>x</b></a>";
        assert_eq!(
            pretty_print_str(input, 2).unwrap(),
            "<a>\n  <!-- note -->\n  <b>x</b>\n</a>\n"
        );
    }

    #[test]
    fn test_comment_copied_verbatim() {
        let input = "<a><!-- keep < and > here --></a>";
        let out = ugly_print_str(input).unwrap();
        assert_eq!(out, "<a><!-- keep < and > here --></a>");
    }

    #[test]
    fn test_cdata_counts_as_data() {
        let input = "<a><![CDATA[x < y && z]]></a>";
        assert_eq!(
            pretty_print_str(input, 2).unwrap(),
            "<a><![CDATA[x < y && z]]></a>\n"
        );
    }

    #[test]
    fn test_xml_declaration_passes_through() {
        let input = "<?xml version=\"1.0\" encoding=\"utf-8\"?><r></r>";
        let out = ugly_print_str(input).unwrap();
        assert_eq!(out, "<?xml version=\"1.0\" encoding=\"utf-8\"?><r></r>");
    }

    #[test]
    fn test_nested_closing_tags_dedent() {
        let input = "<a><b><c>x</c></b></a>";
        assert_eq!(
            pretty_print_str(input, 4).unwrap(),
            "<a>\n    <b>\n        <c>x</c>\n    </b>\n</a>\n"
        );
    }

    #[test]
    fn test_truncated_input_best_effort() {
        // Runs out of characters mid-OpeningTag; no error, partial output.
        let input = "<a><b attr=\"unfinis";
        assert_eq!(
            pretty_print_str(input, 2).unwrap(),
            "<a>\n  <b attr=\"unfinis\n"
        );
    }

    #[test]
    fn test_malformed_no_error() {
        let input = ">>><<<weird>>>";
        // Must not fail; exact output is best-effort.
        assert!(ugly_print_str(input).is_ok());
    }

    #[test]
    fn test_indent_floors_at_zero() {
        // More closing tags than opening ones must not underflow.
        let input = "</a></b><c>x</c>";
        let out = pretty_print_str(input, 2).unwrap();
        assert_eq!(out, "</a>\n</b>\n<c>x</c>\n");
    }

    #[test]
    fn test_cancellation_checkpoint() {
        let cancel = CancelToken::new();
        cancel.cancel();
        // Bigger than the checkpoint cadence so the flag is observed.
        let input = format!("<a>{}</a>", "x".repeat(20_000));
        let mut out = Vec::new();
        let f = XmlStreamFormatter::new(FormatOptions::ugly(), input.as_bytes(), &mut out);
        assert!(matches!(
            f.run(&cancel),
            Err(crate::error::Error::Cancelled)
        ));
    }

    #[test]
    fn test_large_input_flushes_in_blocks() {
        // Enough output to force intermediate flushes.
        let inner: String = (0..2000).map(|i| format!("<i>{i}</i>")).collect();
        let input = format!("<r>{inner}</r>");
        let out = ugly_print_str(&input).unwrap();
        assert_eq!(out, input);
    }
}
