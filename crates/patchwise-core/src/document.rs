//! The editor-host document surface and an in-memory implementation.
//!
//! Line indices on [`Document`] are 0-based, offsets are byte offsets into
//! [`Document::text`]. A line's end offset excludes its terminator.

use std::ops::{Range, RangeInclusive};

use crate::error::{Error, Result};

/// A mutable text buffer owned by the editor host.
pub trait Document: Send {
    fn text(&self) -> &str;

    /// Number of lines. Empty text has none; a trailing terminator does not
    /// open a new line.
    fn line_count(&self) -> usize;

    /// Offset of the first byte of `line`. `line` must be below `line_count`.
    fn line_start_offset(&self, line: usize) -> usize;

    /// Offset just past the last byte of `line`, before its terminator.
    fn line_end_offset(&self, line: usize) -> usize;

    /// Replace `start..end` with `text`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Apply`] when the range is out of bounds or does not
    /// fall on character boundaries.
    fn replace_range(&mut self, start: usize, end: usize, text: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`Error::Apply`] when `offset` is not a valid position.
    fn insert_at(&mut self, offset: usize, text: &str) -> Result<()> {
        self.replace_range(offset, offset, text)
    }

    /// # Errors
    ///
    /// Returns [`Error::Apply`] when the range is invalid.
    fn delete_range(&mut self, start: usize, end: usize) -> Result<()> {
        self.replace_range(start, end, "")
    }

    /// Active selection, if any.
    fn selection(&self) -> Option<Range<usize>> {
        None
    }

    fn clear_selection(&mut self) {}

    /// Mark 1-based lines as touched by a pending change.
    fn add_highlight(&mut self, _lines: RangeInclusive<usize>) {}

    fn clear_highlights(&mut self) {}
}

/// A [`Document`] held in memory, used by the CLI host and in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDocument {
    text: String,
    line_starts: Vec<usize>,
    selection: Option<Range<usize>>,
    highlights: Vec<RangeInclusive<usize>>,
}

impl TextDocument {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = line_starts(&text);
        Self {
            text,
            line_starts,
            selection: None,
            highlights: Vec::new(),
        }
    }

    /// Select a byte range. Clamped to the text.
    pub fn select(&mut self, range: Range<usize>) {
        let len = self.text.len();
        self.selection = Some(range.start.min(len)..range.end.min(len));
    }

    /// Select whole 1-based lines `first..=last`.
    pub fn select_lines(&mut self, first: usize, last: usize) {
        if self.line_count() == 0 || first == 0 || last < first {
            self.selection = None;
            return;
        }
        let last_index = (last - 1).min(self.line_count() - 1);
        let first_index = (first - 1).min(last_index);
        self.selection =
            Some(self.line_start_offset(first_index)..self.line_end_offset(last_index));
    }

    /// The selected text, if any.
    #[must_use]
    pub fn selected_text(&self) -> Option<&str> {
        self.selection
            .as_ref()
            .and_then(|range| self.text.get(range.clone()))
    }

    #[must_use]
    pub fn highlights(&self) -> &[RangeInclusive<usize>] {
        &self.highlights
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        if start > end || end > self.text.len() {
            return Err(Error::Apply(format!(
                "range {start}..{end} is outside the document (length {})",
                self.text.len()
            )));
        }
        if !self.text.is_char_boundary(start) || !self.text.is_char_boundary(end) {
            return Err(Error::Apply(format!(
                "range {start}..{end} splits a character"
            )));
        }
        Ok(())
    }
}

impl Document for TextDocument {
    fn text(&self) -> &str {
        &self.text
    }

    fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn line_start_offset(&self, line: usize) -> usize {
        self.line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len())
    }

    fn line_end_offset(&self, line: usize) -> usize {
        let Some(next) = self.line_starts.get(line + 1).copied() else {
            return trim_terminator(&self.text, self.text.len());
        };
        trim_terminator(&self.text, next)
    }

    fn replace_range(&mut self, start: usize, end: usize, text: &str) -> Result<()> {
        self.check_range(start, end)?;
        self.text.replace_range(start..end, text);
        self.line_starts = line_starts(&self.text);
        if self
            .selection
            .as_ref()
            .is_some_and(|selection| selection.end > self.text.len())
        {
            self.selection = None;
        }
        Ok(())
    }

    fn selection(&self) -> Option<Range<usize>> {
        self.selection.clone()
    }

    fn clear_selection(&mut self) {
        self.selection = None;
    }

    fn add_highlight(&mut self, lines: RangeInclusive<usize>) {
        self.highlights.push(lines);
    }

    fn clear_highlights(&mut self) {
        self.highlights.clear();
    }
}

/// "\r\n" when the text uses it anywhere, "\n" otherwise.
#[must_use]
pub fn detect_line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") { "\r\n" } else { "\n" }
}

fn line_starts(text: &str) -> Vec<usize> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut starts = vec![0];
    starts.extend(
        text.match_indices('\n')
            .map(|(i, _)| i + 1)
            .filter(|&start| start < text.len()),
    );
    starts
}

/// Step back over the terminator that ends just before `offset`.
fn trim_terminator(text: &str, offset: usize) -> usize {
    let head = &text[..offset];
    if head.ends_with("\r\n") {
        offset - 2
    } else if head.ends_with('\n') {
        offset - 1
    } else {
        offset
    }
}
